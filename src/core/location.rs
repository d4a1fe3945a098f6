//! Purpose: Parse instance location strings (`wrld_…:name~tag(value)~…`).
//! Exports: `Location`.
//! Role: Typed view over the `location`/`instanceId` fields of users and instances.
//! Invariants: The raw string is always retained; parsing never loses it.
use crate::core::error::{Error, ErrorKind};
use crate::core::types::{InstanceType, Region};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Location {
    pub raw: String,
    pub world_id: Option<String>,
    pub instance_name: Option<String>,
    pub instance_type: InstanceType,
    pub owner_id: Option<String>,
    pub region: Option<Region>,
    pub nonce: Option<String>,
}

impl Location {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut location = Location {
            raw: raw.to_string(),
            world_id: None,
            instance_name: None,
            instance_type: InstanceType::Public,
            owner_id: None,
            region: None,
            nonce: None,
        };
        if raw.is_empty() || matches!(raw, "offline" | "private" | "traveling") {
            return Ok(location);
        }

        let (world_id, instance) = match raw.split_once(':') {
            Some((world_id, instance)) => (Some(world_id), instance),
            None => (None, raw),
        };
        if world_id.is_some_and(str::is_empty) {
            return Err(malformed(raw, "empty world id"));
        }
        location.world_id = world_id.map(str::to_string);

        let mut parts = instance.split('~');
        let name = parts.next().unwrap_or_default();
        if !name.is_empty() {
            location.instance_name = Some(name.to_string());
        }
        for part in parts {
            let (tag, value) = split_tag(part).ok_or_else(|| malformed(raw, part))?;
            match tag {
                "hidden" | "friends" | "private" | "group" => {
                    location.instance_type = InstanceType::from_tag(tag);
                    location.owner_id = value.map(str::to_string);
                }
                "canRequestInvite" => {
                    if location.instance_type == InstanceType::Invite {
                        location.instance_type = InstanceType::InvitePlus;
                    }
                }
                "region" => location.region = value.map(Region::from_wire),
                "nonce" => location.nonce = value.map(str::to_string),
                _ => {}
            }
        }
        Ok(location)
    }

    pub fn is_offline(&self) -> bool {
        self.raw == "offline" || self.raw.is_empty()
    }

    /// True when the owner hides where they are.
    pub fn is_private(&self) -> bool {
        self.raw == "private"
    }

    pub fn is_traveling(&self) -> bool {
        self.raw == "traveling"
    }

    /// Instance part of the location (everything after `worldId:`).
    pub fn instance_id(&self) -> Option<&str> {
        self.world_id.as_ref()?;
        self.raw.split_once(':').map(|(_, instance)| instance)
    }
}

fn split_tag(part: &str) -> Option<(&str, Option<&str>)> {
    match part.split_once('(') {
        Some((tag, rest)) => {
            let value = rest.strip_suffix(')')?;
            Some((tag, Some(value)))
        }
        None if part.contains(')') => None,
        None => Some((part, None)),
    }
}

fn malformed(raw: &str, detail: &str) -> Error {
    Error::new(ErrorKind::Schema).with_message(format!("malformed location `{raw}`: {detail}"))
}
