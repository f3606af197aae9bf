use std::fmt;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use crate::error::{InvalidIdSnafu, ThreadError, ThreadResult};

macro_rules! define_thread_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> ThreadResult<Self> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-thread-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = ThreadError;

            fn from_str(raw: &str) -> ThreadResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_thread_id!(ConversationId, "conversation-id");
define_thread_id!(MessageId, "message-id");

impl MessageId {
    /// Parent of the first message in every thread.
    pub const ROOT: Self = Self(Uuid::nil());

    pub fn is_root(&self) -> bool {
        self.0.is_nil()
    }
}
