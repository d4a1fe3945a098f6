// Value records and list filters. Records are plain serde values, not identity-mapped.
use super::transport::Call;
use crate::core::types::{DeveloperType, FavoriteType, ReleaseStatus, UserStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: String,
    #[serde(rename = "type", default)]
    pub favorite_type: String,
    #[serde(default)]
    pub favorite_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Favorite {
    pub fn kind(&self) -> Option<FavoriteType> {
        FavoriteType::from_wire(&self.favorite_type)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type", default)]
    pub notification_type: String,
    #[serde(default)]
    pub sender_user_id: Option<String>,
    #[serde(default)]
    pub sender_username: Option<String>,
    #[serde(default)]
    pub receiver_user_id: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub seen: bool,
    #[serde(rename = "created_at", default)]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields of the current user's profile to change; unset fields are left alone.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio_links: Option<Vec<String>>,
}

impl ProfileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: UserStatus) -> Self {
        self.status = Some(status.as_str().to_string());
        self
    }

    pub fn with_status_description(mut self, description: impl Into<String>) -> Self {
        self.status_description = Some(description.into());
        self
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    pub fn with_bio_links<I, S>(mut self, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bio_links = Some(links.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FriendFilter {
    /// List offline friends instead of online ones.
    pub offline: bool,
}

impl FriendFilter {
    pub fn online() -> Self {
        Self { offline: false }
    }

    pub fn offline() -> Self {
        Self { offline: true }
    }

    pub(crate) fn apply(&self, call: Call) -> Call {
        call.query("offline", self.offline)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserSearch {
    pub search: Option<String>,
    pub developer_type: Option<DeveloperType>,
}

impl UserSearch {
    pub fn named(search: impl Into<String>) -> Self {
        Self {
            search: Some(search.into()),
            ..Self::default()
        }
    }

    pub(crate) fn apply(&self, call: Call) -> Call {
        call.query_opt("search", self.search.as_deref())
            .query_opt("developerType", self.developer_type.as_ref().map(DeveloperType::as_str))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorldFilter {
    pub search: Option<String>,
    pub featured: Option<bool>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub user_id: Option<String>,
    pub tag: Option<String>,
    pub release_status: Option<ReleaseStatus>,
}

impl WorldFilter {
    pub(crate) fn apply(&self, call: Call) -> Call {
        call.query_opt("search", self.search.as_deref())
            .query_opt("featured", self.featured)
            .query_opt("sort", self.sort.as_deref())
            .query_opt("order", self.order.as_deref())
            .query_opt("userId", self.user_id.as_deref())
            .query_opt("tag", self.tag.as_deref())
            .query_opt(
                "releaseStatus",
                self.release_status.as_ref().map(ReleaseStatus::as_str),
            )
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AvatarFilter {
    /// `"me"` lists the current user's own avatars.
    pub user: Option<String>,
    pub user_id: Option<String>,
    pub featured: Option<bool>,
    pub tag: Option<String>,
    pub release_status: Option<ReleaseStatus>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub platform: Option<String>,
}

impl AvatarFilter {
    pub fn by_author(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            release_status: Some(ReleaseStatus::Public),
            ..Self::default()
        }
    }

    pub(crate) fn apply(&self, call: Call) -> Call {
        call.query_opt("user", self.user.as_deref())
            .query_opt("userId", self.user_id.as_deref())
            .query_opt("featured", self.featured)
            .query_opt("tag", self.tag.as_deref())
            .query_opt(
                "releaseStatus",
                self.release_status.as_ref().map(ReleaseStatus::as_str),
            )
            .query_opt("sort", self.sort.as_deref())
            .query_opt("order", self.order.as_deref())
            .query_opt("platform", self.platform.as_deref())
    }
}
