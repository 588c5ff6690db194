mod base;

pub use base::{EventBus, EventEmitter, PassId, PassScope, PropagationEvent};
