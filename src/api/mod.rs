//! Purpose: Public client surface for the remote social-platform API.
//! Exports: `Client`, auth/session types, entity proxies, paging, records and config.
//! Role: The only path callers use; transport and cache internals are re-exported selectively.
//! Invariants: Every public operation returns a complete result or an `Error`.

mod auth;
mod client;
mod config;
mod entities;
mod paginate;
mod records;
mod session;
mod transport;

pub use crate::core::cache::{Entity, EntityCache, EntityKey, EntityRef};
pub use crate::core::error::{Error, ErrorClass, ErrorKind};
pub use crate::core::location::Location;
pub use crate::core::payload::{EntityKind, RawPayload};
pub use crate::core::types::{
    DeveloperType, FavoriteType, InstanceType, Region, ReleaseStatus, TrustRank, UserState,
    UserStatus,
};
pub use auth::{
    AuthPhase, AuthSession, AuthState, Credentials, LoginOutcome, TwoFactorChallenge,
    TwoFactorMethod,
};
pub use client::{ApiResult, Client};
pub use config::{ClientConfig, DEFAULT_BASE_URL, RetryPolicy, TwoFactorPolicy};
pub use entities::{Avatar, EntityHandle, EntityProxy, Friend, Instance, User, World};
pub use paginate::{PageCursor, Paginator};
pub use records::{
    AvatarFilter, Favorite, FriendFilter, Notification, ProfileUpdate, UserSearch, WorldFilter,
};
pub use session::{AUTH_COOKIE, Session, TWO_FACTOR_COOKIE};
pub use transport::{Call, Exchange, Method, Transport, UreqExchange, WireRequest, WireResponse};
