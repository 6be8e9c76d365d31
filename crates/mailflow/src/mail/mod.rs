pub mod broadcast;
pub mod calendar;
pub mod dispatcher;
pub mod drain;
pub mod maintenance;
pub mod memory;
pub mod model;
pub mod qr;
pub mod render;
pub mod repo;
pub mod sender;
pub mod service;
pub mod store;

pub use broadcast::{
    BroadcastLog, BroadcastLogStore, BroadcastRequest, BroadcastTarget, Reservation,
    ReservationSource,
};
pub use dispatcher::{DispatchOptions, DispatchReport, Dispatcher};
pub use drain::{DrainOptions, DrainSummary, Drainer, ProcessedJob};
pub use maintenance::Retention;
pub use memory::{MemoryBroadcastLogStore, MemoryQueueStore, MemoryReservationSource};
pub use model::{
    DispatchResult, MailJob, MailJobStatus, NewMailJob, Recipient, RecipientError,
    SendMailRequest,
};
pub use qr::QrCodeService;
pub use render::{BodyMarkup, RenderContext, RenderVariant, TemplateRenderer};
pub use repo::{PgBroadcastLogStore, PgQueueStore, PgReservationSource};
pub use sender::{LogSender, MailSender, OutgoingMail, SmtpConfig, SmtpSender};
pub use service::{BroadcastOutcome, MailService, SubmitOutcome};
pub use store::{QueueCounts, QueueStore};
