//! Purpose: Typed, read-through views over cached entities.
//! Exports: `EntityHandle`, `EntityProxy`, `User`, `Friend`, `World`, `Avatar`, `Instance`.
//! Role: What callers hold; every accessor reads the canonical `Entity` in the cache.
//! Invariants: Proxies never copy entity fields; merges are visible immediately.
//! Invariants: A proxy whose entity was evicted reports `CacheMiss` until it is re-fetched.
//! Invariants: Mutators make one call and never retry locally.
#![allow(clippy::result_large_err)]

use super::client::Client;
use super::paginate::Paginator;
use super::records::{AvatarFilter, Favorite, Notification};
use super::transport::Call;
use crate::core::cache::{Entity, EntityCache, EntityKey, EntityRef, read_entity};
use crate::core::error::{Error, ErrorKind};
use crate::core::location::Location;
use crate::core::payload::{EntityKind, RawPayload};
use crate::core::types::{
    DeveloperType, FavoriteType, InstanceType, Region, ReleaseStatus, TrustRank, UserState,
    UserStatus,
};
use serde_json::{Value, json};
use std::fmt;
use std::sync::{Arc, Weak};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

type ApiResult<T> = Result<T, Error>;

const SHORT_URL_BASE: &str = "https://vrchat.com/i/";

/// Weak link to a cached entity plus the key to find it again after eviction.
#[derive(Clone)]
pub struct EntityHandle {
    key: EntityKey,
    entity: Weak<std::sync::RwLock<Entity>>,
    cache: EntityCache,
}

impl EntityHandle {
    pub(crate) fn new(key: EntityKey, entity: &EntityRef, cache: EntityCache) -> Self {
        Self {
            key,
            entity: Arc::downgrade(entity),
            cache,
        }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }

    pub fn kind(&self) -> EntityKind {
        self.key.kind
    }

    pub fn resolve(&self) -> ApiResult<EntityRef> {
        match self.entity.upgrade() {
            Some(entity) => Ok(entity),
            None => self.cache.get(self.key.kind, &self.key.id),
        }
    }

    pub fn read<T>(&self, f: impl FnOnce(&Entity) -> T) -> ApiResult<T> {
        let entity = self.resolve()?;
        let guard = read_entity(&entity);
        Ok(f(&guard))
    }

    pub fn same_entity(&self, other: &EntityHandle) -> bool {
        if self.key != other.key {
            return false;
        }
        match (self.resolve(), other.resolve()) {
            (Ok(left), Ok(right)) => Arc::ptr_eq(&left, &right),
            _ => false,
        }
    }

    fn required_str(&self, field: &str) -> ApiResult<String> {
        self.read(|entity| entity.str(field).map(str::to_string))?
            .ok_or_else(|| {
                Error::new(ErrorKind::Schema).with_message(format!(
                    "{} `{}` has no `{field}`",
                    self.key.kind, self.key.id
                ))
            })
    }

    fn opt_str(&self, field: &str) -> ApiResult<Option<String>> {
        self.read(|entity| entity.str(field).map(str::to_string))
    }

    fn opt_u64(&self, field: &str) -> ApiResult<Option<u64>> {
        self.read(|entity| entity.get(field).and_then(Value::as_u64))
    }

    fn opt_bool(&self, field: &str) -> ApiResult<Option<bool>> {
        self.read(|entity| entity.get(field).and_then(Value::as_bool))
    }

    fn strings(&self, field: &str) -> ApiResult<Vec<String>> {
        self.read(|entity| {
            entity
                .get(field)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    fn timestamp(&self, field: &str) -> ApiResult<Option<OffsetDateTime>> {
        let Some(raw) = self.opt_str(field)?.filter(|raw| !raw.is_empty()) else {
            return Ok(None);
        };
        OffsetDateTime::parse(&raw, &Rfc3339).map(Some).map_err(|err| {
            Error::new(ErrorKind::Schema)
                .with_message(format!("`{field}` is not an RFC 3339 timestamp"))
                .with_source(err)
        })
    }

    fn location(&self, field: &str) -> ApiResult<Option<Location>> {
        match self.opt_str(field)? {
            Some(raw) => Location::parse(&raw).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("kind", &self.key.kind)
            .field("id", &self.key.id)
            .finish()
    }
}

/// Capabilities shared by every proxy kind.
pub trait EntityProxy: Sized {
    const KIND: EntityKind;

    fn from_handle(handle: EntityHandle) -> Self;

    fn handle(&self) -> &EntityHandle;

    /// The call that fetches the full payload for `id`.
    fn fetch_call(id: &str) -> Call;

    fn id(&self) -> &str {
        self.handle().id()
    }

    /// Re-fetches by id and merges into the canonical entity; returns this same proxy.
    /// A payload answering for a different id is rejected and nothing is merged.
    fn refresh(&self, client: &mut Client) -> ApiResult<&Self> {
        let call = Self::fetch_call(self.id());
        let value = client.dispatch(&call)?;
        let payload = RawPayload::from_value(value)?;
        if let Some(other) = payload.id(Self::KIND).filter(|other| *other != self.id()) {
            return Err(Error::new(ErrorKind::InvalidResponse)
                .with_message(format!(
                    "refresh of {} `{}` answered for `{other}`",
                    Self::KIND,
                    self.id()
                ))
                .with_path(call.path()));
        }
        client.adopt_payload::<Self>(payload)?;
        Ok(self)
    }

    fn to_payload(&self) -> ApiResult<RawPayload> {
        self.handle().read(Entity::to_payload)
    }

    fn revision(&self) -> ApiResult<u64> {
        self.handle().read(Entity::revision)
    }

    /// True when both proxies read the same live entity.
    fn same_entity(&self, other: &Self) -> bool {
        self.handle().same_entity(other.handle())
    }
}

macro_rules! proxy {
    ($name:ident, $kind:expr, |$id:ident| $fetch:expr) => {
        #[derive(Clone, Debug)]
        pub struct $name {
            handle: EntityHandle,
        }

        impl EntityProxy for $name {
            const KIND: EntityKind = $kind;

            fn from_handle(handle: EntityHandle) -> Self {
                Self { handle }
            }

            fn handle(&self) -> &EntityHandle {
                &self.handle
            }

            fn fetch_call($id: &str) -> Call {
                $fetch
            }
        }
    };
}

proxy!(User, EntityKind::User, |id| Call::get(["users", id]));
proxy!(Friend, EntityKind::Friend, |id| Call::get(["users", id]));
proxy!(World, EntityKind::World, |id| Call::get(["worlds", id]));
proxy!(Avatar, EntityKind::Avatar, |id| Call::get(["avatars", id]));
proxy!(Instance, EntityKind::Instance, |id| Call::get(["instances", id]));

impl User {
    pub fn display_name(&self) -> ApiResult<String> {
        self.handle.required_str("displayName")
    }

    pub fn username(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("username")
    }

    pub fn bio(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("bio")
    }

    pub fn status(&self) -> ApiResult<Option<UserStatus>> {
        Ok(self
            .handle
            .opt_str("status")?
            .map(|status| UserStatus::from_wire(&status)))
    }

    pub fn status_description(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("statusDescription")
    }

    pub fn state(&self) -> ApiResult<Option<UserState>> {
        Ok(self
            .handle
            .opt_str("state")?
            .map(|state| UserState::from_wire(&state)))
    }

    /// Online per `state` when present, otherwise per `location`.
    pub fn is_online(&self) -> ApiResult<bool> {
        if let Some(state) = self.state()? {
            return Ok(state == UserState::Online);
        }
        Ok(self
            .location()?
            .is_some_and(|location| !location.is_offline()))
    }

    pub fn tags(&self) -> ApiResult<Vec<String>> {
        self.handle.strings("tags")
    }

    pub fn trust_rank(&self) -> ApiResult<TrustRank> {
        Ok(TrustRank::from_tags(&self.tags()?))
    }

    pub fn developer_type(&self) -> ApiResult<Option<DeveloperType>> {
        Ok(self
            .handle
            .opt_str("developerType")?
            .map(|kind| DeveloperType::from_wire(&kind)))
    }

    pub fn location(&self) -> ApiResult<Option<Location>> {
        self.handle.location("location")
    }

    pub fn last_login(&self) -> ApiResult<Option<OffsetDateTime>> {
        self.handle.timestamp("last_login")
    }

    pub fn is_friend(&self) -> ApiResult<Option<bool>> {
        self.handle.opt_bool("isFriend")
    }

    pub fn avatar_image_url(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("currentAvatarImageUrl")
    }

    pub fn send_friend_request(&self, client: &mut Client) -> ApiResult<Notification> {
        let value = client.dispatch(&Call::post(["user", self.id(), "friendRequest"]))?;
        serde_json::from_value(value).map_err(|err| {
            Error::new(ErrorKind::InvalidResponse)
                .with_message("invalid friend request notification")
                .with_source(err)
        })
    }

    pub fn favorite(&self, client: &mut Client, tag: Option<&str>) -> ApiResult<Favorite> {
        client.add_favorite(FavoriteType::Friend, self.id(), tag)
    }

    pub fn public_avatars<'c>(&self, client: &'c mut Client) -> Paginator<'c, Avatar> {
        client.list_avatars(AvatarFilter::by_author(self.id()))
    }
}

impl Friend {
    pub fn display_name(&self) -> ApiResult<String> {
        self.handle.required_str("displayName")
    }

    pub fn status(&self) -> ApiResult<Option<UserStatus>> {
        Ok(self
            .handle
            .opt_str("status")?
            .map(|status| UserStatus::from_wire(&status)))
    }

    pub fn status_description(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("statusDescription")
    }

    pub fn state(&self) -> ApiResult<Option<UserState>> {
        Ok(self
            .handle
            .opt_str("state")?
            .map(|state| UserState::from_wire(&state)))
    }

    pub fn location(&self) -> ApiResult<Option<Location>> {
        self.handle.location("location")
    }

    pub fn tags(&self) -> ApiResult<Vec<String>> {
        self.handle.strings("tags")
    }

    pub fn trust_rank(&self) -> ApiResult<TrustRank> {
        Ok(TrustRank::from_tags(&self.tags()?))
    }

    /// Removes the friendship and drops this entry from the cache.
    pub fn unfriend(&self, client: &mut Client) -> ApiResult<()> {
        client.dispatch(&Call::delete(["auth", "user", "friends", self.id()]))?;
        client.cache().evict(EntityKind::Friend, self.id());
        if client.cache().contains(EntityKind::User, self.id()) {
            client.apply_update(
                EntityKind::User,
                self.id(),
                RawPayload::new().with("isFriend", false),
            )?;
        }
        Ok(())
    }

    /// Fetches the full user record behind this friend entry.
    pub fn user(&self, client: &mut Client) -> ApiResult<User> {
        client.get_user(self.id())
    }
}

impl World {
    pub fn name(&self) -> ApiResult<String> {
        self.handle.required_str("name")
    }

    pub fn author_id(&self) -> ApiResult<String> {
        self.handle.required_str("authorId")
    }

    pub fn author_name(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("authorName")
    }

    pub fn description(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("description")
    }

    pub fn capacity(&self) -> ApiResult<Option<u64>> {
        self.handle.opt_u64("capacity")
    }

    pub fn release_status(&self) -> ApiResult<Option<ReleaseStatus>> {
        Ok(self
            .handle
            .opt_str("releaseStatus")?
            .map(|status| ReleaseStatus::from_wire(&status)))
    }

    pub fn occupants(&self) -> ApiResult<Option<u64>> {
        self.handle.opt_u64("occupants")
    }

    pub fn favorites(&self) -> ApiResult<Option<u64>> {
        self.handle.opt_u64("favorites")
    }

    pub fn visits(&self) -> ApiResult<Option<u64>> {
        self.handle.opt_u64("visits")
    }

    pub fn tags(&self) -> ApiResult<Vec<String>> {
        self.handle.strings("tags")
    }

    pub fn updated_at(&self) -> ApiResult<Option<OffsetDateTime>> {
        self.handle.timestamp("updated_at")
    }

    /// Instance names listed on the world, as `[name, occupants]` pairs on the wire.
    pub fn instance_ids(&self) -> ApiResult<Vec<String>> {
        self.handle.read(|entity| {
            entity
                .get("instances")
                .and_then(Value::as_array)
                .map(|instances| {
                    instances
                        .iter()
                        .filter_map(|instance| match instance {
                            Value::Array(pair) => pair.first().and_then(Value::as_str),
                            Value::String(name) => Some(name.as_str()),
                            _ => None,
                        })
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn favorite(&self, client: &mut Client, tag: Option<&str>) -> ApiResult<Favorite> {
        client.add_favorite(FavoriteType::World, self.id(), tag)
    }

    pub fn instance(&self, client: &mut Client, instance_id: &str) -> ApiResult<Instance> {
        client.get_instance(&format!("{}:{instance_id}", self.id()))
    }

    pub fn author(&self, client: &mut Client) -> ApiResult<User> {
        let author_id = self.author_id()?;
        client.get_user(&author_id)
    }
}

impl Avatar {
    pub fn name(&self) -> ApiResult<String> {
        self.handle.required_str("name")
    }

    pub fn author_id(&self) -> ApiResult<String> {
        self.handle.required_str("authorId")
    }

    pub fn author_name(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("authorName")
    }

    pub fn description(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("description")
    }

    pub fn release_status(&self) -> ApiResult<Option<ReleaseStatus>> {
        Ok(self
            .handle
            .opt_str("releaseStatus")?
            .map(|status| ReleaseStatus::from_wire(&status)))
    }

    pub fn image_url(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("imageUrl")
    }

    pub fn thumbnail_image_url(&self) -> ApiResult<Option<String>> {
        self.handle.opt_str("thumbnailImageUrl")
    }

    pub fn tags(&self) -> ApiResult<Vec<String>> {
        self.handle.strings("tags")
    }

    /// Switches the current user into this avatar; returns the updated current user.
    pub fn select(&self, client: &mut Client) -> ApiResult<User> {
        let value = client.dispatch(&Call::put(["avatars", self.id(), "select"]))?;
        client.adopt_current_user(value)
    }

    pub fn favorite(&self, client: &mut Client, tag: Option<&str>) -> ApiResult<Favorite> {
        client.add_favorite(FavoriteType::Avatar, self.id(), tag)
    }

    pub fn author(&self, client: &mut Client) -> ApiResult<User> {
        let author_id = self.author_id()?;
        client.get_user(&author_id)
    }
}

impl Instance {
    pub fn world_id(&self) -> ApiResult<String> {
        self.handle.required_str("worldId")
    }

    pub fn instance_id(&self) -> ApiResult<String> {
        self.handle.required_str("instanceId")
    }

    /// The full location this instance is keyed by.
    pub fn location(&self) -> ApiResult<Location> {
        Location::parse(self.id())
    }

    pub fn capacity(&self) -> ApiResult<Option<u64>> {
        self.handle.opt_u64("capacity")
    }

    pub fn user_count(&self) -> ApiResult<Option<u64>> {
        self.handle.read(|entity| {
            entity
                .get("n_users")
                .or_else(|| entity.get("userCount"))
                .and_then(Value::as_u64)
        })
    }

    pub fn instance_type(&self) -> ApiResult<InstanceType> {
        match self.handle.opt_str("type")? {
            Some(tag) => Ok(InstanceType::from_tag(&tag)),
            None => Ok(self.location()?.instance_type),
        }
    }

    pub fn region(&self) -> ApiResult<Option<Region>> {
        match self.handle.opt_str("region")? {
            Some(region) => Ok(Some(Region::from_wire(&region))),
            None => Ok(self.location()?.region),
        }
    }

    /// Shareable `vrchat.com/i/…` link; the short name is fetched on first use and cached.
    pub fn short_url(&self, client: &mut Client) -> ApiResult<String> {
        if let Some(short_name) = self.handle.opt_str("shortName")? {
            return Ok(format!("{SHORT_URL_BASE}{short_name}"));
        }
        let value = client.dispatch(&Call::get(["instances", self.id(), "shortName"]))?;
        let short_name = value
            .get("shortName")
            .or_else(|| value.get("secureName"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::new(ErrorKind::InvalidResponse).with_message("instance has no short name")
            })?
            .to_string();
        client.apply_update(
            EntityKind::Instance,
            self.id(),
            RawPayload::new().with("shortName", short_name.as_str()),
        )?;
        Ok(format!("{SHORT_URL_BASE}{short_name}"))
    }

    pub fn world(&self, client: &mut Client) -> ApiResult<World> {
        let world_id = self.world_id()?;
        client.get_world(&world_id)
    }

    /// Marks this instance as the current user's destination.
    pub fn join(&self, client: &mut Client) -> ApiResult<()> {
        let call = Call::put(["joins"]).json(json!({ "worldId": self.id() }));
        client.dispatch(&call)?;
        Ok(())
    }
}
