pub mod poller;
pub mod submission;
pub mod types;

pub use poller::{JobPoller, PollEvent, PollTicket, PollUpdate};
pub use submission::JobSubmissionClient;
pub use types::{JobId, JobStatus, PollerState, SubmitOutcome};
