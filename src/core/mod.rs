pub mod context;
pub mod dedup;
pub mod event;
pub mod event_bus;
pub mod runner;
pub mod runtime_context;
pub mod session;
pub mod tracker;

pub use context::ExecutionContext;
pub use dedup::MessageDeduplicator;
pub use event::InboundEvent;
pub use event_bus::{create_event_channel, EventEmitter, EventReceiver, EventSender, FlowEvent};
pub use runner::{FlowRunner, DEFAULT_MAX_STEPS};
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
pub use session::{SessionPermit, SessionSerializer};
pub use tracker::{ExecutionRecord, FileTrackerStore, MemoryTrackerStore, TrackerError, TrackerStore};
