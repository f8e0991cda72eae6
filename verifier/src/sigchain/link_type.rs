//! Link types and the per-type policy table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DecodeError;

/// Purpose of a link. The numeric values are the ones carried in V2 outer
/// links; the names are the `body.type` strings of the JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigchainV2Type {
    Eldest,
    WebServiceBinding,
    Track,
    Untrack,
    Revoke,
    Cryptocurrency,
    Announcement,
    Device,
    Sibkey,
    Subkey,
    PgpUpdate,
    TeamRoot,
    TeamNewSubteam,
    TeamChangeMembership,
    TeamRotateKey,
    TeamLeave,
    TeamSubteamHead,
    TeamRenameSubteam,
    TeamInvite,
    TeamRenameUpPointer,
}

/// Role of the reader of a team chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    None,
    Reader,
    Writer,
    Admin,
    Owner,
}

/// Visibility class of a chain, carried in the V2 outer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeqType {
    Public,
    Private,
    Semiprivate,
}

const ALL_TYPES: [SigchainV2Type; 20] = [
    SigchainV2Type::Eldest,
    SigchainV2Type::WebServiceBinding,
    SigchainV2Type::Track,
    SigchainV2Type::Untrack,
    SigchainV2Type::Revoke,
    SigchainV2Type::Cryptocurrency,
    SigchainV2Type::Announcement,
    SigchainV2Type::Device,
    SigchainV2Type::Sibkey,
    SigchainV2Type::Subkey,
    SigchainV2Type::PgpUpdate,
    SigchainV2Type::TeamRoot,
    SigchainV2Type::TeamNewSubteam,
    SigchainV2Type::TeamChangeMembership,
    SigchainV2Type::TeamRotateKey,
    SigchainV2Type::TeamLeave,
    SigchainV2Type::TeamSubteamHead,
    SigchainV2Type::TeamRenameSubteam,
    SigchainV2Type::TeamInvite,
    SigchainV2Type::TeamRenameUpPointer,
];

impl SigchainV2Type {
    /// Every link type, in wire order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &ALL_TYPES
    }

    /// Numeric tag used in V2 outer links.
    #[must_use]
    pub const fn wire_value(self) -> u64 {
        match self {
            Self::Eldest => 1,
            Self::WebServiceBinding => 2,
            Self::Track => 3,
            Self::Untrack => 4,
            Self::Revoke => 5,
            Self::Cryptocurrency => 6,
            Self::Announcement => 7,
            Self::Device => 8,
            Self::Sibkey => 11,
            Self::Subkey => 12,
            Self::PgpUpdate => 13,
            Self::TeamRoot => 33,
            Self::TeamNewSubteam => 34,
            Self::TeamChangeMembership => 35,
            Self::TeamRotateKey => 36,
            Self::TeamLeave => 37,
            Self::TeamSubteamHead => 38,
            Self::TeamRenameSubteam => 39,
            Self::TeamInvite => 40,
            Self::TeamRenameUpPointer => 41,
        }
    }

    /// The `body.type` string of the JSON payload.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eldest => "eldest",
            Self::WebServiceBinding => "web_service_binding",
            Self::Track => "track",
            Self::Untrack => "untrack",
            Self::Revoke => "revoke",
            Self::Cryptocurrency => "cryptocurrency",
            Self::Announcement => "announcement",
            Self::Device => "device",
            Self::Sibkey => "sibkey",
            Self::Subkey => "subkey",
            Self::PgpUpdate => "pgp_update",
            Self::TeamRoot => "team.root",
            Self::TeamNewSubteam => "team.new_subteam",
            Self::TeamChangeMembership => "team.change_membership",
            Self::TeamRotateKey => "team.rotate_key",
            Self::TeamLeave => "team.leave",
            Self::TeamSubteamHead => "team.subteam_head",
            Self::TeamRenameSubteam => "team.rename_subteam",
            Self::TeamInvite => "team.invite",
            Self::TeamRenameUpPointer => "team.rename_up_pointer",
        }
    }

    /// False only for link types whose content is a public statement with
    /// nothing to authorize.
    #[must_use]
    pub const fn needs_signature(self) -> bool {
        !matches!(self, Self::Track | Self::Untrack | Self::Announcement)
    }

    /// True for links that belong to a team sub-chain.
    #[must_use]
    pub const fn is_team_type(self) -> bool {
        matches!(
            self,
            Self::TeamRoot
                | Self::TeamNewSubteam
                | Self::TeamChangeMembership
                | Self::TeamRotateKey
                | Self::TeamLeave
                | Self::TeamSubteamHead
                | Self::TeamRenameSubteam
                | Self::TeamInvite
                | Self::TeamRenameUpPointer
        )
    }

    /// Whether the author of this link must be a team admin.
    #[must_use]
    pub const fn requires_admin_permission(self) -> bool {
        self.is_team_type()
            && !matches!(self, Self::TeamLeave | Self::TeamRotateKey | Self::TeamRoot)
    }

    /// Whether a reader holding `role` may receive this team link as a stub.
    ///
    /// Admins and owners always get full content.
    #[must_use]
    pub const fn team_allow_stub(self, role: TeamRole) -> bool {
        if role.is_admin_or_above() {
            return false;
        }
        matches!(
            self,
            Self::TeamNewSubteam | Self::TeamRenameSubteam | Self::TeamInvite
        )
    }

    /// Whether this link may be stubbed on a user (non-team) chain.
    #[must_use]
    pub const fn user_allow_stub(self) -> bool {
        !self.is_team_type() && !self.needs_signature()
    }
}

impl TryFrom<u64> for SigchainV2Type {
    type Error = DecodeError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        ALL_TYPES
            .iter()
            .copied()
            .find(|t| t.wire_value() == value)
            .ok_or(DecodeError::UnknownLinkType(value))
    }
}

impl FromStr for SigchainV2Type {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_TYPES
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownLinkTypeName(s.to_string()))
    }
}

impl fmt::Display for SigchainV2Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TeamRole {
    #[must_use]
    pub const fn is_admin_or_above(self) -> bool {
        matches!(self, Self::Admin | Self::Owner)
    }
}

impl FromStr for TeamRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "reader" => Ok(Self::Reader),
            "writer" => Ok(Self::Writer),
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            other => Err(format!("unknown team role '{other}'")),
        }
    }
}

impl SeqType {
    #[must_use]
    pub const fn wire_value(self) -> u8 {
        match self {
            Self::Public => 1,
            Self::Private => 2,
            Self::Semiprivate => 3,
        }
    }
}

impl TryFrom<u8> for SeqType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Public),
            2 => Ok(Self::Private),
            3 => Ok(Self::Semiprivate),
            other => Err(DecodeError::MalformedOuter(format!(
                "unknown seq type {other}"
            ))),
        }
    }
}
