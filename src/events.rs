use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Milliseconds since the start of a run.
pub type Millis = u64;

/// BCM-numbered digital output.
pub type PinId = u8;

/// Version stamped into [`TimelineDocument`]; bump when the layout changes.
pub const TIMELINE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    PinOn(PinId),
    PinOff(PinId),
    PlayAudio { asset: String, volume: u32 },
    Stop,
}

/// Every action due at one instant. Actions keep the order in which the
/// compiler emitted them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at: Millis,
    pub actions: Vec<Action>,
}

/// A compiled run: strictly ascending timestamps, ending in exactly one
/// `Stop` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    events: Vec<TimedEvent>,
}

#[derive(Debug, Serialize)]
struct TimelineDocument<'a> {
    version: u32,
    events: &'a [TimedEvent],
}

impl Timeline {
    /// Builds a timeline from actions grouped by timestamp, appending the
    /// terminal stop `tail` ms after the last group. Returns `None` when there
    /// is nothing to schedule or the stop would not fit in [`Millis`].
    pub(crate) fn from_groups(groups: BTreeMap<Millis, Vec<Action>>, tail: Millis) -> Option<Self> {
        let stop_at = groups.keys().next_back()?.checked_add(tail)?;

        let mut events: Vec<TimedEvent> = groups
            .into_iter()
            .map(|(at, actions)| TimedEvent { at, actions })
            .collect();
        events.push(TimedEvent {
            at: stop_at,
            actions: vec![Action::Stop],
        });

        Some(Self { events })
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stop_at(&self) -> Millis {
        self.events.last().map_or(0, |e| e.at)
    }

    /// Every audio asset referenced anywhere in the timeline, reached or not.
    pub fn assets(&self) -> BTreeSet<&str> {
        self.events
            .iter()
            .flat_map(|e| e.actions.iter())
            .filter_map(|action| match action {
                Action::PlayAudio { asset, .. } => Some(asset.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Versioned RON rendering, used for debug output.
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        let doc = TimelineDocument {
            version: TIMELINE_FORMAT_VERSION,
            events: &self.events,
        };
        ron::ser::to_string_pretty(&doc, ron::ser::PrettyConfig::default())
    }
}
