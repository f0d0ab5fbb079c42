//! Keeps a per-user whitelist of chat/user ids in sync with a remote
//! endpoint, cached in a local store, with updates delivered to a single
//! listener on a dedicated notification context.

mod error;
mod fetcher;
mod identity;
mod listener;
mod manager;
mod store;

pub use error::{StoreError, SyncError};
pub use fetcher::RemoteFetcher;
pub use identity::{ClientError, GetMeReply, IdentityResolver, MessagingClient, StaticIdentityClient};
pub use listener::{
    ChannelListener, Dispatcher, Job, ThreadDispatcher, UpdateListener, WhitelistEvent,
    NOTIFY_THREAD_NAME,
};
pub use manager::{ManagerCell, ManagerParts, WhitelistManager};
pub use store::PersistentStore;
pub use xorlist_contracts::{CurrentUser, Identifier, SnapshotLocation};
