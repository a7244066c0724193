//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Value and channel bus shared by components and calculators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use thiserror::Error;

use crate::channel::Channel;
use crate::value::Value;

/// Reasons an aggregate over a [`ChannelCollection`] cannot be produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollectionError {
    /// The pattern matched no channel.
    #[error("channel collection '{pattern}' is empty")]
    Empty {
        /// Pattern the collection was resolved from.
        pattern: String,
    },
    /// A member channel holds no numeric value yet.
    #[error("channel '{channel}' in collection '{pattern}' has no numeric value")]
    NotNumeric {
        /// Pattern the collection was resolved from.
        pattern: String,
        /// Offending member channel.
        channel: String,
    },
}

/// Ordered group of channels resolved once from a pattern.
///
/// Membership is fixed at resolution time; channels declared later are not
/// picked up.
#[derive(Debug, Clone)]
pub struct ChannelCollection {
    pattern: String,
    channels: Vec<Arc<Channel>>,
}

impl ChannelCollection {
    pub(crate) fn new(pattern: impl Into<String>, channels: Vec<Arc<Channel>>) -> Self {
        Self {
            pattern: pattern.into(),
            channels,
        }
    }

    /// Pattern the collection was resolved from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Number of member channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the pattern matched nothing.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Member channels in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.iter()
    }

    /// Member at `index`.
    pub fn get(&self, index: usize) -> Option<&Arc<Channel>> {
        self.channels.get(index)
    }

    /// Member names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_owned()).collect()
    }

    /// Copy of the collection without the channel called `name`.
    pub fn excluding(&self, name: &str) -> Self {
        Self {
            pattern: self.pattern.clone(),
            channels: self
                .channels
                .iter()
                .filter(|channel| channel.name() != name)
                .cloned()
                .collect(),
        }
    }

    /// Plain arithmetic mean of the members' latest values, stamped with `timestamp`.
    pub fn mean(&self, timestamp: i64) -> Result<Value, CollectionError> {
        if self.channels.is_empty() {
            return Err(CollectionError::Empty {
                pattern: self.pattern.clone(),
            });
        }
        let mut sum = 0.0;
        for channel in &self.channels {
            let value = channel.latest().as_f64().ok_or_else(|| CollectionError::NotNumeric {
                pattern: self.pattern.clone(),
                channel: channel.name().to_owned(),
            })?;
            sum += value;
        }
        Ok(Value::double(sum / self.channels.len() as f64, timestamp))
    }
}

impl<'a> IntoIterator for &'a ChannelCollection {
    type Item = &'a Arc<Channel>;
    type IntoIter = std::slice::Iter<'a, Arc<Channel>>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.iter()
    }
}
