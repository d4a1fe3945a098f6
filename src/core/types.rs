// Wire enumerations. Unrecognized values are kept as `Other` so schema drift never fails a read.

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReleaseStatus {
    Public,
    Private,
    Hidden,
    All,
    Other(String),
}

impl ReleaseStatus {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "public" => ReleaseStatus::Public,
            "private" => ReleaseStatus::Private,
            "hidden" => ReleaseStatus::Hidden,
            "all" => ReleaseStatus::All,
            other => ReleaseStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReleaseStatus::Public => "public",
            ReleaseStatus::Private => "private",
            ReleaseStatus::Hidden => "hidden",
            ReleaseStatus::All => "all",
            ReleaseStatus::Other(other) => other,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UserState {
    Online,
    Active,
    Offline,
    Other(String),
}

impl UserState {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "online" => UserState::Online,
            "active" => UserState::Active,
            "offline" => UserState::Offline,
            other => UserState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UserState::Online => "online",
            UserState::Active => "active",
            UserState::Offline => "offline",
            UserState::Other(other) => other,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UserStatus {
    Active,
    JoinMe,
    AskMe,
    Busy,
    Offline,
    Other(String),
}

impl UserStatus {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "active" => UserStatus::Active,
            "join me" => UserStatus::JoinMe,
            "ask me" => UserStatus::AskMe,
            "busy" => UserStatus::Busy,
            "offline" => UserStatus::Offline,
            other => UserStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UserStatus::Active => "active",
            UserStatus::JoinMe => "join me",
            UserStatus::AskMe => "ask me",
            UserStatus::Busy => "busy",
            UserStatus::Offline => "offline",
            UserStatus::Other(other) => other,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeveloperType {
    None,
    Trusted,
    Internal,
    Moderator,
    Other(String),
}

impl DeveloperType {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "none" => DeveloperType::None,
            "trusted" => DeveloperType::Trusted,
            "internal" => DeveloperType::Internal,
            "moderator" => DeveloperType::Moderator,
            other => DeveloperType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeveloperType::None => "none",
            DeveloperType::Trusted => "trusted",
            DeveloperType::Internal => "internal",
            DeveloperType::Moderator => "moderator",
            DeveloperType::Other(other) => other,
        }
    }
}

/// Access level encoded in an instance location tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceType {
    Public,
    FriendsPlus,
    Friends,
    Invite,
    InvitePlus,
    Group,
    Other(String),
}

impl InstanceType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "" | "public" => InstanceType::Public,
            "hidden" => InstanceType::FriendsPlus,
            "friends" => InstanceType::Friends,
            "private" => InstanceType::Invite,
            "group" => InstanceType::Group,
            other => InstanceType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            InstanceType::Public => "public",
            InstanceType::FriendsPlus => "hidden",
            InstanceType::Friends => "friends",
            InstanceType::Invite | InstanceType::InvitePlus => "private",
            InstanceType::Group => "group",
            InstanceType::Other(other) => other,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FavoriteType {
    World,
    Friend,
    Avatar,
}

impl FavoriteType {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "world" => Some(FavoriteType::World),
            "friend" => Some(FavoriteType::Friend),
            "avatar" => Some(FavoriteType::Avatar),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FavoriteType::World => "world",
            FavoriteType::Friend => "friend",
            FavoriteType::Avatar => "avatar",
        }
    }

    /// Favorite group used when the caller does not name one.
    pub fn default_tag(self) -> &'static str {
        match self {
            FavoriteType::World => "worlds1",
            FavoriteType::Friend => "group_0",
            FavoriteType::Avatar => "avatars1",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Region {
    Us,
    UsWest,
    UsEast,
    Eu,
    Jp,
    Other(String),
}

impl Region {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "us" => Region::Us,
            "usw" => Region::UsWest,
            "use" => Region::UsEast,
            "eu" => Region::Eu,
            "jp" => Region::Jp,
            other => Region::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Region::Us => "us",
            Region::UsWest => "usw",
            Region::UsEast => "use",
            Region::Eu => "eu",
            Region::Jp => "jp",
            Region::Other(other) => other,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum TrustRank {
    Visitor,
    NewUser,
    User,
    KnownUser,
    TrustedUser,
}

impl TrustRank {
    /// Highest rank granted by the `system_trust_*` tags; visitors carry none.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        tags.iter()
            .filter_map(|tag| match tag.as_ref() {
                "system_trust_basic" => Some(TrustRank::NewUser),
                "system_trust_known" => Some(TrustRank::User),
                "system_trust_trusted" => Some(TrustRank::KnownUser),
                "system_trust_veteran" => Some(TrustRank::TrustedUser),
                _ => None,
            })
            .max()
            .unwrap_or(TrustRank::Visitor)
    }
}
