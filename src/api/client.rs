//! Purpose: Caller-facing client wiring transport, auth, cache and proxies together.
//! Exports: `Client`, `ApiResult`.
//! Role: One instance per account; owns its `Session` (via `AuthSession`) and `EntityCache`.
//! Invariants: Every entity payload is upserted before a proxy for it is returned.
//! Invariants: All authenticated calls go through `AuthSession::dispatch`.
//! Invariants: Independent clients share no state.
#![allow(clippy::result_large_err)]

use super::auth::{AuthPhase, AuthSession, AuthState, Credentials, LoginOutcome};
use super::config::ClientConfig;
use super::entities::{Avatar, EntityHandle, EntityProxy, Friend, Instance, User, World};
use super::paginate::Paginator;
use super::records::{
    AvatarFilter, Favorite, FriendFilter, Notification, ProfileUpdate, UserSearch, WorldFilter,
};
use super::session::Session;
use super::transport::{Call, Exchange, Transport, UreqExchange};
use crate::core::cache::{EntityCache, EntityKey};
use crate::core::error::{Error, ErrorKind};
use crate::core::payload::{EntityKind, RawPayload};
use crate::core::types::FavoriteType;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

pub type ApiResult<T> = Result<T, Error>;

pub struct Client {
    config: ClientConfig,
    transport: Transport,
    auth: AuthSession,
    cache: EntityCache,
    current_user_id: Option<String>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_exchange(config, UreqExchange::new())
    }

    /// Builds a client over a custom exchange (TLS options, proxies, test doubles).
    pub fn with_exchange(config: ClientConfig, exchange: impl Exchange + 'static) -> Self {
        let transport = Transport::new(&config, exchange);
        let auth = AuthSession::new(&config);
        Self {
            config,
            transport,
            auth,
            cache: EntityCache::new(),
            current_user_id: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The identity map; the event-stream side may upsert into it directly.
    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn session(&self) -> &Session {
        self.auth.session()
    }

    pub fn auth_state(&self) -> &AuthState {
        self.auth.state()
    }

    pub fn auth_phase(&self) -> AuthPhase {
        self.auth.phase()
    }

    pub fn auth_history(&self) -> &[AuthPhase] {
        self.auth.history()
    }

    pub fn current_user_id(&self) -> Option<&str> {
        self.current_user_id.as_deref()
    }

    pub fn login(&mut self, credentials: Credentials) -> ApiResult<LoginOutcome> {
        let outcome = self.auth.login(&self.transport, credentials)?;
        if let LoginOutcome::Authenticated(payload) = &outcome {
            self.adopt_current_user(payload.clone().into_value())?;
        }
        Ok(outcome)
    }

    pub fn verify_two_factor(&mut self, code: &str) -> ApiResult<()> {
        self.auth.verify_two_factor(&self.transport, code)
    }

    /// Logs out and forgets every cached entity of this account.
    pub fn logout(&mut self) -> ApiResult<()> {
        let result = self.auth.logout(&self.transport);
        self.current_user_id = None;
        self.cache.clear();
        result
    }

    pub fn current_user(&mut self) -> ApiResult<User> {
        let value = self.dispatch(&Call::get(["auth", "user"]))?;
        self.adopt_current_user(value)
    }

    pub fn get_user(&mut self, id: &str) -> ApiResult<User> {
        self.fetch::<User>(id)
    }

    pub fn get_user_by_name(&mut self, username: &str) -> ApiResult<User> {
        let value = self.dispatch(&Call::get(["users", username, "name"]))?;
        self.adopt(value)
    }

    pub fn get_world(&mut self, id: &str) -> ApiResult<World> {
        self.fetch::<World>(id)
    }

    pub fn get_avatar(&mut self, id: &str) -> ApiResult<Avatar> {
        self.fetch::<Avatar>(id)
    }

    /// `location` is the full `worldId:instanceId` string.
    pub fn get_instance(&mut self, location: &str) -> ApiResult<Instance> {
        self.fetch::<Instance>(location)
    }

    /// The friend entry for `id`; fails with `NotFriends` when the user is not a friend.
    pub fn get_friend(&mut self, id: &str) -> ApiResult<Friend> {
        let value = self.dispatch(&Friend::fetch_call(id))?;
        let payload = RawPayload::from_value(value)?;
        if payload.bool("isFriend") == Some(false) {
            return Err(Error::new(ErrorKind::NotFriends)
                .with_message(format!("`{id}` is not a friend"))
                .with_path(Friend::fetch_call(id).path()));
        }
        self.adopt_payload(payload)
    }

    pub fn list_friends(&mut self, filter: FriendFilter) -> Paginator<'_, Friend> {
        let call = filter.apply(Call::get(["auth", "user", "friends"]));
        Paginator::new(self, call)
    }

    pub fn list_users(&mut self, search: UserSearch) -> Paginator<'_, User> {
        let call = search.apply(Call::get(["users"]));
        Paginator::new(self, call)
    }

    pub fn list_worlds(&mut self, filter: WorldFilter) -> Paginator<'_, World> {
        let call = filter.apply(Call::get(["worlds"]));
        Paginator::new(self, call)
    }

    pub fn list_avatars(&mut self, filter: AvatarFilter) -> Paginator<'_, Avatar> {
        let call = filter.apply(Call::get(["avatars"]));
        Paginator::new(self, call)
    }

    pub fn refresh<P: EntityProxy>(&mut self, proxy: &P) -> ApiResult<()> {
        proxy.refresh(self).map(|_| ())
    }

    pub fn update_profile(&mut self, update: &ProfileUpdate) -> ApiResult<User> {
        if update.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("profile update is empty"));
        }
        let user_id = match &self.current_user_id {
            Some(id) => id.clone(),
            None => self.current_user()?.id().to_string(),
        };
        let body = serde_json::to_value(update).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode profile update")
                .with_source(err)
        })?;
        let value = self.dispatch(&Call::put(["users", user_id.as_str()]).json(body))?;
        self.adopt_current_user(value)
    }

    /// Adds `id` to a favorite group; `tag` defaults to the first group of that type.
    pub fn add_favorite(
        &mut self,
        kind: FavoriteType,
        id: &str,
        tag: Option<&str>,
    ) -> ApiResult<Favorite> {
        let tag = tag.unwrap_or(kind.default_tag());
        let call = Call::post(["favorites"]).json(json!({
            "type": kind.as_str(),
            "favoriteId": id,
            "tags": [tag],
        }));
        let value = self.dispatch(&call)?;
        decode_record(value, "favorite")
    }

    pub fn list_favorites(&mut self, kind: Option<FavoriteType>) -> ApiResult<Vec<Favorite>> {
        let call = Call::get(["favorites"])
            .query("n", self.config.page_size)
            .query_opt("type", kind.map(FavoriteType::as_str));
        let value = self.dispatch(&call)?;
        decode_record(value, "favorite list")
    }

    pub fn get_favorite(&mut self, favorite_id: &str) -> ApiResult<Favorite> {
        if favorite_id.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("favorite id must not be empty"));
        }
        let value = self.dispatch(&Call::get(["favorites", favorite_id]))?;
        decode_record(value, "favorite")
    }

    pub fn remove_favorite(&mut self, favorite_id: &str) -> ApiResult<()> {
        self.dispatch(&Call::delete(["favorites", favorite_id]))?;
        Ok(())
    }

    pub fn notifications(&mut self) -> ApiResult<Vec<Notification>> {
        let value = self.dispatch(&Call::get(["auth", "user", "notifications"]))?;
        decode_record(value, "notification list")
    }

    /// Merges a partial payload pushed by an event source. Creates the entity if needed.
    pub fn apply_update(&self, kind: EntityKind, id: &str, payload: RawPayload) -> ApiResult<()> {
        self.cache.upsert(kind, id, payload)?;
        Ok(())
    }

    pub(crate) fn dispatch(&mut self, call: &Call) -> ApiResult<Value> {
        self.auth.dispatch(&self.transport, call)
    }

    pub(crate) fn adopt_payload<P: EntityProxy>(&self, payload: RawPayload) -> ApiResult<P> {
        payload.require(P::KIND)?;
        let id = payload
            .id(P::KIND)
            .map(str::to_string)
            .ok_or_else(|| Error::new(ErrorKind::Schema).with_message("payload has no id"))?;
        let entity = self.cache.upsert(P::KIND, &id, payload)?;
        Ok(P::from_handle(EntityHandle::new(
            EntityKey::new(P::KIND, id),
            &entity,
            self.cache.clone(),
        )))
    }

    pub(crate) fn adopt_current_user(&mut self, value: Value) -> ApiResult<User> {
        let user: User = self.adopt(value)?;
        self.current_user_id = Some(user.id().to_string());
        Ok(user)
    }

    fn adopt<P: EntityProxy>(&self, value: Value) -> ApiResult<P> {
        self.adopt_payload(RawPayload::from_value(value)?)
    }

    fn fetch<P: EntityProxy>(&mut self, id: &str) -> ApiResult<P> {
        if id.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("id must not be empty"));
        }
        let value = self.dispatch(&P::fetch_call(id))?;
        self.adopt(value)
    }
}

fn decode_record<T: DeserializeOwned>(value: Value, what: &str) -> ApiResult<T> {
    serde_json::from_value(value).map_err(|err| {
        Error::new(ErrorKind::InvalidResponse)
            .with_message(format!("invalid {what} payload"))
            .with_source(err)
    })
}
