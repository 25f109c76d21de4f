//! `/`-separated JSON paths
//!
//! `settings/cameras[0]/detectors[1]/model_path`. Empty segments are ignored,
//! so leading and doubled slashes are harmless.

use serde_json::Value;

/// One path segment: member name with an optional array index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub index: Option<usize>,
}

impl Segment {
    fn parse(raw: &str) -> Option<Self> {
        match (raw.rfind('['), raw.rfind(']')) {
            (Some(open), Some(close)) if open < close => {
                let index = raw[open + 1..close].trim().parse().ok()?;
                Some(Self {
                    name: raw[..open].to_string(),
                    index: Some(index),
                })
            }
            _ => Some(Self {
                name: raw.to_string(),
                index: None,
            }),
        }
    }
}

/// Split a path into segments. `None` when an index is not a number.
pub fn parse(path: &str) -> Option<Vec<Segment>> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(Segment::parse)
        .collect()
}

fn step<'a>(value: &'a Value, segment: &Segment) -> Option<&'a Value> {
    let member = if segment.name.is_empty() {
        value
    } else {
        value.as_object()?.get(&segment.name)?
    };
    match segment.index {
        Some(i) => member.as_array()?.get(i),
        None => Some(member),
    }
}

fn step_mut<'a>(value: &'a mut Value, segment: &Segment) -> Option<&'a mut Value> {
    let member = if segment.name.is_empty() {
        value
    } else {
        value.as_object_mut()?.get_mut(&segment.name)?
    };
    match segment.index {
        Some(i) => member.as_array_mut()?.get_mut(i),
        None => Some(member),
    }
}

/// Read the value at `path`
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse(path)?;
    if segments.is_empty() {
        return None;
    }
    segments.iter().try_fold(root, step)
}

/// Replace the value at `path`
///
/// Only existing members are replaced; nothing is created. Returns whether a
/// value was written.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> bool {
    let Some(segments) = parse(path) else {
        return false;
    };
    if segments.is_empty() {
        return false;
    }

    let mut current = root;
    for segment in &segments {
        match step_mut(current, segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    *current = value;
    true
}
