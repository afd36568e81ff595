use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// String newtypes keep the many name-like fields in the descriptor model from being mixed up
/// at call sites. They serialize as plain strings.
macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Debug, Default, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd,
            Serialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

pub(crate) use string_newtype;

string_newtype!(
    /// The account a location deploys into.
    Account
);
string_newtype!(
    /// The region a location deploys into.
    Region
);
string_newtype!(
    /// The environment type of a location, e.g. `dev`, `staging`, `prod`.
    EnvType
);
string_newtype!(
    /// An optional label distinguishing multiple deployments of the same service into the same
    /// cluster location.
    Label
);

/// The location identity of the cluster a controller instance runs in. Only descriptor locations
/// matching this tuple are materialized by that instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLocation {
    pub account: Account,
    pub region: Region,
    pub env_type: EnvType,
}

impl ClusterLocation {
    /// The full location obtained by attaching a label to this cluster location.
    pub fn location(&self, label: Label) -> Location {
        Location {
            account: self.account.clone(),
            region: self.region.clone(),
            env_type: self.env_type.clone(),
            label,
        }
    }
}

/// A deployment target: a cluster location plus an optional label.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub account: Account,
    pub region: Region,
    pub env_type: EnvType,
    #[serde(default, skip_serializing_if = "Label::is_empty")]
    pub label: Label,
}

impl Location {
    pub fn cluster_location(&self) -> ClusterLocation {
        ClusterLocation {
            account: self.account.clone(),
            region: self.region.clone(),
            env_type: self.env_type.clone(),
        }
    }

    /// The scope hierarchy this location is resolved against, most significant first. Variable
    /// scopes are matched by joining prefixes of this list with `.`.
    pub fn hierarchy(&self) -> Vec<String> {
        vec![
            self.env_type.to_string(),
            self.region.to_string(),
            self.label.to_string(),
            self.account.to_string(),
        ]
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.label.is_empty() {
            write!(f, "{}/{}/{}", self.account, self.region, self.env_type)
        } else {
            write!(
                f,
                "{}/{}/{} ({})",
                self.account, self.region, self.env_type, self.label
            )
        }
    }
}
