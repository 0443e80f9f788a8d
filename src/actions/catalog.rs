//! Static metadata per job type: endpoint key, one-time flag, payload shape.
//!
//! Pure data. Building a payload needs an RNG and the occupied-index map but
//! performs no I/O.

use std::collections::{BTreeSet, HashMap};

use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::{Map, Value};

use crate::jobs::JobType;

/// Index slots a one-time action can consume on one origin job.
pub const INDEX_SLOTS: [&str; 4] = ["1", "2", "3", "4"];

const ZOOM_RATIOS: [&str; 4] = ["1.5", "1.25", "2.0", "1.75"];
const DIRECTIONS: [&str; 4] = ["up", "left", "down", "right"];

/// One field of a derivative payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadField {
    OriginTaskId,
    Index,
    Prompt,
    AspectRatio,
    ZoomRatio,
    Direction,
}

impl PayloadField {
    fn key(self) -> &'static str {
        match self {
            Self::OriginTaskId => "origin_task_id",
            Self::Index => "index",
            Self::Prompt => "prompt",
            Self::AspectRatio => "aspect_ratio",
            Self::ZoomRatio => "zoom_ratio",
            Self::Direction => "direction",
        }
    }
}

/// Catalog entry for one job type.
#[derive(Debug)]
pub struct CatalogEntry {
    pub job_type: JobType,
    /// Key of the endpoint URL in the `goapi.urls` config map.
    pub endpoint_key: &'static str,
    /// Consumes one of [`INDEX_SLOTS`] per origin job.
    pub one_time: bool,
    /// Derivative payload fields; `None` when the type cannot be requested
    /// as a derivative.
    pub template: Option<&'static [PayloadField]>,
}

use PayloadField::*;

static CATALOG: [CatalogEntry; 7] = [
    CatalogEntry {
        job_type: JobType::Generate,
        endpoint_key: "imagine",
        one_time: false,
        template: None,
    },
    CatalogEntry {
        job_type: JobType::Upscale,
        endpoint_key: "upscale",
        one_time: true,
        template: Some(&[OriginTaskId, Index]),
    },
    CatalogEntry {
        job_type: JobType::Variant,
        endpoint_key: "variation",
        one_time: false,
        template: Some(&[OriginTaskId, Index, Prompt, AspectRatio]),
    },
    CatalogEntry {
        job_type: JobType::Inpaint,
        endpoint_key: "inpaint",
        one_time: false,
        template: None,
    },
    CatalogEntry {
        job_type: JobType::Pan,
        endpoint_key: "pan",
        one_time: false,
        template: Some(&[OriginTaskId, Direction, Prompt, AspectRatio]),
    },
    CatalogEntry {
        job_type: JobType::Reroll,
        endpoint_key: "reroll",
        one_time: false,
        template: Some(&[OriginTaskId, Prompt, AspectRatio]),
    },
    CatalogEntry {
        job_type: JobType::Outpaint,
        endpoint_key: "outpaint",
        one_time: false,
        template: Some(&[OriginTaskId, ZoomRatio, Prompt, AspectRatio]),
    },
];

/// Look up the catalog entry for a job type.
pub fn entry(job_type: JobType) -> &'static CatalogEntry {
    let slot = match job_type {
        JobType::Generate => 0,
        JobType::Upscale => 1,
        JobType::Variant => 2,
        JobType::Inpaint => 3,
        JobType::Pan => 4,
        JobType::Reroll => 5,
        JobType::Outpaint => 6,
    };
    &CATALOG[slot]
}

/// Index slots consumed per `(origin id, job type)` during one chain run.
#[derive(Debug, Default, Clone)]
pub struct OccupiedIndexes {
    slots: HashMap<(String, JobType), BTreeSet<&'static str>>,
}

impl OccupiedIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots still free for this origin and type.
    pub fn available(&self, origin_id: &str, job_type: JobType) -> Vec<&'static str> {
        let taken = self.slots.get(&(origin_id.to_string(), job_type));
        INDEX_SLOTS
            .iter()
            .copied()
            .filter(|slot| taken.is_none_or(|t| !t.contains(slot)))
            .collect()
    }

    /// Mark a slot consumed. Returns false if it already was.
    pub fn occupy(&mut self, origin_id: &str, job_type: JobType, index: &'static str) -> bool {
        self.slots
            .entry((origin_id.to_string(), job_type))
            .or_default()
            .insert(index)
    }

    pub fn get(&self, origin_id: &str, job_type: JobType) -> Option<&BTreeSet<&'static str>> {
        self.slots.get(&(origin_id.to_string(), job_type))
    }
}

/// Why no payload could be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSkip {
    /// The type has no derivative template.
    NoTemplate,
    /// All index slots for this origin are consumed.
    IndexesExhausted,
}

impl std::fmt::Display for PayloadSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTemplate => write!(f, "payload not available"),
            Self::IndexesExhausted => write!(f, "ran out of available indexes"),
        }
    }
}

/// A request body plus the index it would consume.
#[derive(Debug, Clone)]
pub struct BuiltPayload {
    pub body: Value,
    /// Slot to record once the job is accepted; set for one-time types only.
    pub consumed_index: Option<&'static str>,
}

/// Build the derivative payload for `job_type` on `origin_id`.
pub fn build_payload<R: Rng + ?Sized>(
    job_type: JobType,
    origin_id: &str,
    occupied: &OccupiedIndexes,
    rng: &mut R,
) -> Result<BuiltPayload, PayloadSkip> {
    let entry = entry(job_type);
    let fields = entry.template.ok_or(PayloadSkip::NoTemplate)?;

    let slots = if entry.one_time {
        occupied.available(origin_id, job_type)
    } else {
        INDEX_SLOTS.to_vec()
    };

    let mut body = Map::new();
    let mut chosen_index = None;
    for field in fields {
        let value = match field {
            OriginTaskId => origin_id.to_string(),
            Index => {
                let slot = *slots.choose(rng).ok_or(PayloadSkip::IndexesExhausted)?;
                chosen_index = Some(slot);
                slot.to_string()
            }
            Prompt | AspectRatio => String::new(),
            ZoomRatio => pick(&ZOOM_RATIOS, rng),
            Direction => pick(&DIRECTIONS, rng),
        };
        body.insert(field.key().to_string(), Value::String(value));
    }
    body.insert("webhook_endpoint".to_string(), Value::String(String::new()));
    body.insert("webhook_secret".to_string(), Value::String(String::new()));

    Ok(BuiltPayload {
        body: Value::Object(body),
        consumed_index: chosen_index.filter(|_| entry.one_time),
    })
}

fn pick<R: Rng + ?Sized>(choices: &[&str], rng: &mut R) -> String {
    choices.choose(rng).copied().unwrap_or_default().to_string()
}
