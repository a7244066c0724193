//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Value and channel bus shared by components and calculators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use ems_common::UnknownChannelError;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::channel::{Channel, ListenerHandle, ListenerResult};
use crate::collection::ChannelCollection;
use crate::value::Value;

/// Channel name pattern: an exact name or a `prefix*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPattern {
    /// Matches exactly one name.
    Exact(String),
    /// Matches every name starting with the prefix.
    Prefix(String),
}

impl ChannelPattern {
    /// Parse `"prefix*"` as a prefix pattern, anything else as an exact name.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_owned()),
            None => Self::Exact(pattern.to_owned()),
        }
    }

    /// Whether `name` matches.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// Registry of declared channels.
///
/// The name map is read-mostly; each [`Channel`] carries its own locks so
/// traffic on unrelated channels never contends.
#[derive(Default)]
pub struct ChannelBus {
    channels: RwLock<IndexMap<String, Arc<Channel>>>,
}

impl ChannelBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a channel; declaring an existing name returns the existing channel.
    pub fn declare(&self, name: &str) -> Arc<Channel> {
        if let Some(channel) = self.channels.read().get(name) {
            return channel.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(name.to_owned())
            .or_insert_with(|| {
                debug!(channel = %name, "channel declared");
                Arc::new(Channel::new(name))
            })
            .clone()
    }

    /// Declare every name in order.
    pub fn declare_all<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.declare(name.as_ref());
        }
    }

    /// Whether `name` has been declared.
    pub fn contains(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    /// Declared names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    /// Handle for a declared channel.
    pub fn channel(&self, name: &str) -> Result<Arc<Channel>, UnknownChannelError> {
        self.channels
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownChannelError::new(name))
    }

    /// Publish `value` on `name`; see [`Channel::publish`].
    pub fn publish(&self, name: &str, value: Value) -> Result<(), UnknownChannelError> {
        let channel = self.channel(name)?;
        channel.publish(value);
        Ok(())
    }

    /// Register a listener on `name`; see [`Channel::subscribe`].
    pub fn subscribe<F>(&self, name: &str, listener: F) -> Result<ListenerHandle, UnknownChannelError>
    where
        F: Fn(&Value) -> ListenerResult + Send + Sync + 'static,
    {
        let channel = self.channel(name)?;
        Ok(channel.subscribe(listener))
    }

    /// Latest value on `name`, the unknown value when nothing was published.
    pub fn latest(&self, name: &str) -> Result<Value, UnknownChannelError> {
        Ok(self.channel(name)?.latest())
    }

    /// Channels matching `pattern` at call time, in declaration order.
    ///
    /// An exact pattern naming an undeclared channel fails; a wildcard that
    /// matches nothing yields an empty collection.
    pub fn resolve(&self, pattern: &str) -> Result<ChannelCollection, UnknownChannelError> {
        let parsed = ChannelPattern::parse(pattern);
        match &parsed {
            ChannelPattern::Exact(name) => {
                let channel = self.channel(name)?;
                Ok(ChannelCollection::new(pattern, vec![channel]))
            }
            ChannelPattern::Prefix(_) => {
                let matched = self
                    .channels
                    .read()
                    .iter()
                    .filter(|(name, _)| parsed.matches(name))
                    .map(|(_, channel)| channel.clone())
                    .collect();
                Ok(ChannelCollection::new(pattern, matched))
            }
        }
    }
}

impl fmt::Debug for ChannelBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBus")
            .field("channels", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_parsing() {
        assert_eq!(ChannelPattern::parse("temp*"), ChannelPattern::Prefix("temp".into()));
        assert_eq!(ChannelPattern::parse("temp"), ChannelPattern::Exact("temp".into()));
        assert!(ChannelPattern::parse("temp*").matches("temp_top"));
        assert!(!ChannelPattern::parse("temp").matches("temp_top"));
        assert_eq!(ChannelPattern::parse("temp*").to_string(), "temp*");
    }

    #[test]
    fn declare_is_idempotent() {
        let bus = ChannelBus::new();
        let first = bus.declare("power");
        let second = bus.declare("power");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(bus.names(), vec!["power".to_string()]);
    }

    #[test]
    fn undeclared_channel_is_reported_by_name() {
        let bus = ChannelBus::new();
        let err = bus.publish("missing", Value::double(1.0, 1)).unwrap_err();
        assert_eq!(err, UnknownChannelError::new("missing"));
        assert!(bus.latest("missing").is_err());
        assert!(bus.resolve("missing").is_err());
    }
}
