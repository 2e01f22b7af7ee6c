use std::fmt;

use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};

macro_rules! wire_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(
      Debug,
      Clone,
      Copy,
      PartialEq,
      Eq,
      Hash,
      PartialOrd,
      Ord,
      Serialize,
      Deserialize,
    )]
    #[serde(transparent)]
    pub struct $name(pub i64);

    impl fmt::Display for $name {
      fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>
      ) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }

    impl std::str::FromStr for $name {
      type Err = std::num::ParseIntError;

      fn from_str(
        s: &str
      ) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
      }
    }
  };
}

wire_id!(
  /// Server-assigned workspace key.
  WorkspaceId
);
wire_id!(GroupId);
wire_id!(TaskId);
wire_id!(
  /// `accountId` of an identity record.
  UserId
);

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
  pub created_by: UserId,
  #[serde(with = "wire_date")]
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub updated_by: Option<UserId>,
  #[serde(default, with = "wire_date::option")]
  pub updated_at: Option<DateTime<Utc>>
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct LoginRequest {
  pub username: String,
  pub password: String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
  pub access_token:  String,
  pub refresh_token: String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
  pub access_token: String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
  pub account_id: UserId,
  pub username:   String,
  pub full_name:  String,
  pub email:      String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct UsersPage {
  pub users: Vec<UserDto>
}

/// Cursor pagination shared by the
/// user and workspace listings.
#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  Default,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct PageArgs {
  pub limit:   Option<u32>,
  pub last_id: Option<i64>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDto {
  pub workspace_id: WorkspaceId,
  pub name:         String,
  #[serde(flatten)]
  pub audit:        Audit
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct WorkspacesPage {
  pub workspaces: Vec<WorkspaceDto>
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct WorkspaceCreate {
  pub name: String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
  pub task_id:              TaskId,
  pub title:                String,
  #[serde(default)]
  pub description:          Option<String>,
  #[serde(default, with = "wire_date::option")]
  pub due_date:
    Option<DateTime<Utc>>,
  #[serde(default)]
  pub assigned_to_user_id:
    Option<UserId>,
  #[serde(default)]
  pub assigned_to:          Option<String>,
  #[serde(flatten)]
  pub audit:                Audit
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
  pub group_id: GroupId,
  pub name:     String,
  #[serde(flatten)]
  pub audit:    Audit
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct GroupWithTasks {
  pub group_id: GroupId,
  pub name:     String,
  #[serde(default)]
  pub tasks:    Vec<TaskDto>,
  #[serde(flatten)]
  pub audit:    Audit
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
  pub workspace_id: WorkspaceId,
  #[serde(default)]
  pub groups:       Vec<GroupWithTasks>
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct GroupRename {
  pub name: String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreate {
  pub title:               String,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub description:         Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub due_date:
    Option<DateTime<Utc>>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub assigned_to_user_id:
    Option<UserId>
}

/// Partial task update. Outer `None`
/// leaves a field untouched, `Some(None)`
/// clears it.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub title:       Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub description:
    Option<Option<String>>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub due_date:
    Option<Option<DateTime<Utc>>>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub assigned_to_user_id:
    Option<Option<UserId>>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub to_group_id: Option<GroupId>
}

impl TaskPatch {
  pub fn is_empty(&self) -> bool {
    self == &Self::default()
  }
}

/// Timestamps from the server may omit
/// the zone designator; those are UTC.
pub mod wire_date {
  use chrono::{
    DateTime,
    NaiveDateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn parse(
    raw: &str
  ) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) =
      DateTime::parse_from_rfc3339(raw)
    {
      return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(
      raw,
      "%Y-%m-%dT%H:%M:%S%.f"
    )
    .or_else(|_| {
      NaiveDateTime::parse_from_str(
        raw,
        "%Y-%m-%d %H:%M:%S%.f"
      )
    })
    .map(|ndt| {
      DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc)
    })
    .map_err(|err| {
      format!(
        "invalid timestamp {raw:?}: \
         {err}"
      )
    })
  }

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt.to_rfc3339_opts(
        SecondsFormat::Millis,
        true
      )
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    parse(&raw)
      .map_err(serde::de::Error::custom)
  }

  pub mod option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw)
          if !raw.trim().is_empty() =>
        {
          super::parse(&raw)
            .map(Some)
            .map_err(
              serde::de::Error::custom
            )
        }
        | _ => Ok(None)
      }
    }
  }
}
