//! Reactive state: the store, its subscriptions and the handles given to
//! component code.

mod handle;
mod manager;
mod scheduler;
mod snapshot;
mod subscription;

pub use handle::{Ref, SetStateAction, StateGetter, StateRead, StateSetter};
pub use manager::{StateManager, Unsubscribe};
pub use scheduler::FlushScheduler;
pub use snapshot::{SNAPSHOT_SCRIPT_ID, StateSnapshot};
pub use subscription::{
	Match, MatchedPath, PathRelation, StateChange, Subscription, SubscriptionCallback, SubscriptionId,
	SubscriptionManager, SubscriptionStats,
};
