use std::collections::BTreeMap;

use thiserror::Error;

use crate::events::{Action, Millis, PinId, Timeline};

/// Gap between the last scheduled instant and the synthetic stop.
pub const STOP_TAIL_MS: Millis = 1000;

/// Bounds a single description must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileLimits {
    /// Toggle instants one blinking `light` clause may generate.
    pub max_blink_toggles: u64,
}

impl Default for CompileLimits {
    fn default() -> Self {
        Self {
            max_blink_toggles: 10_000,
        }
    }
}

/// One parsed effect from a sequence description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Light {
        pins: Vec<PinId>,
        start: Millis,
        end: Millis,
        blink_period: Option<Millis>,
    },
    Sound {
        file: String,
        start: Millis,
        volume: u32,
    },
    ThreeD {
        pins: Vec<PinId>,
        start: Millis,
        end: Millis,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("clause {index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },
    #[error("sequence contains no effects")]
    Empty,
}

fn parse_millis(field: Option<&str>, name: &str) -> Result<Millis, String> {
    field
        .ok_or_else(|| format!("missing {name}"))?
        .trim()
        .parse()
        .map_err(|_| format!("invalid {name}"))
}

/// Pin lists are `/`-separated; repeats collapse onto the first mention.
fn parse_pins(field: Option<&str>) -> Result<Vec<PinId>, String> {
    let field = field.ok_or("missing pin list")?;

    let mut pins = Vec::new();
    for part in field.split('/') {
        let part = part.trim();
        let pin: PinId = part
            .parse()
            .map_err(|_| format!("invalid pin '{part}'"))?;
        if !pins.contains(&pin) {
            pins.push(pin);
        }
    }

    Ok(pins)
}

fn parse_span<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Result<(Millis, Millis), String> {
    let start = parse_millis(fields.next(), "start")?;
    let end = parse_millis(fields.next(), "end")?;
    if end < start {
        return Err(format!("end {end} is before start {start}"));
    }
    Ok((start, end))
}

pub fn parse_clause(text: &str) -> Result<Clause, String> {
    let mut fields = text.split(',');

    let clause = match fields.next().unwrap_or_default().trim() {
        "light" => {
            let pins = parse_pins(fields.next())?;
            let (start, end) = parse_span(&mut fields)?;
            let blink_period = match fields.next() {
                Some(field) => {
                    let period = parse_millis(Some(field), "frequency")?;
                    if period == 0 {
                        return Err("frequency must be greater than zero".into());
                    }
                    Some(period)
                }
                None => None,
            };

            Clause::Light {
                pins,
                start,
                end,
                blink_period,
            }
        }

        "sound" => {
            let file = fields
                .next()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .ok_or("missing filename")?
                .to_string();
            let start = parse_millis(fields.next(), "start")?;
            let volume: u32 = fields
                .next()
                .ok_or("missing volume")?
                .trim()
                .parse()
                .map_err(|_| "invalid volume")?;

            Clause::Sound {
                file,
                start,
                volume,
            }
        }

        "three_d" => {
            let pins = parse_pins(fields.next())?;
            let (start, end) = parse_span(&mut fields)?;

            Clause::ThreeD { pins, start, end }
        }

        other => return Err(format!("unknown effect '{other}'")),
    };

    if fields.next().is_some() {
        return Err("too many fields".into());
    }

    Ok(clause)
}

impl Clause {
    /// Rejects clauses whose instants leave no room for the final stop or
    /// whose blink pattern exceeds `limits`.
    fn check(&self, limits: &CompileLimits) -> Result<(), String> {
        let latest = match self {
            Clause::Light { end, .. } | Clause::ThreeD { end, .. } => *end,
            Clause::Sound { start, .. } => *start,
        };
        if latest.checked_add(STOP_TAIL_MS).is_none() {
            return Err(format!("time {latest} is out of range"));
        }

        if let Clause::Light {
            start,
            end,
            blink_period: Some(period),
            ..
        } = self
        {
            let toggles = (end - start).saturating_sub(1) / period.div_ceil(2);
            if toggles > limits.max_blink_toggles {
                return Err(format!(
                    "too many blink toggles ({toggles}, limit {})",
                    limits.max_blink_toggles
                ));
            }
        }

        Ok(())
    }

    fn expand(&self, out: &mut BTreeMap<Millis, Vec<Action>>) {
        let mut emit = |at: Millis, actions: &mut dyn Iterator<Item = Action>| {
            out.entry(at).or_default().extend(actions);
        };

        match self {
            Clause::Light {
                pins,
                start,
                end,
                blink_period,
            } => {
                emit(*start, &mut pins.iter().map(|&p| Action::PinOn(p)));
                emit(*end, &mut pins.iter().map(|&p| Action::PinOff(p)));

                if let Some(period) = blink_period {
                    // Pins are lit from `start`, so the first toggle switches them off.
                    let half = period.div_ceil(2);
                    let mut index = 0usize;
                    let mut at = start.saturating_add(half);
                    while at < *end {
                        if index % 2 == 0 {
                            emit(at, &mut pins.iter().map(|&p| Action::PinOff(p)));
                        } else {
                            emit(at, &mut pins.iter().map(|&p| Action::PinOn(p)));
                        }
                        index += 1;
                        at = at.saturating_add(half);
                    }
                }
            }
            Clause::Sound {
                file,
                start,
                volume,
            } => {
                emit(
                    *start,
                    &mut std::iter::once(Action::PlayAudio {
                        asset: file.clone(),
                        volume: *volume,
                    }),
                );
            }
            Clause::ThreeD { pins, start, end } => {
                emit(*start, &mut pins.iter().map(|&p| Action::PinOn(p)));
                emit(*end, &mut pins.iter().map(|&p| Action::PinOff(p)));
            }
        }
    }
}

/// Parses every non-blank clause, keeping its position in the description.
fn parse_indexed(text: &str) -> Result<Vec<(usize, Clause)>, CompileError> {
    text.split('?')
        .map(str::trim)
        .enumerate()
        .filter(|(_, clause)| !clause.is_empty())
        .map(|(index, clause)| {
            parse_clause(clause)
                .map(|parsed| (index, parsed))
                .map_err(|reason| CompileError::Malformed { index, reason })
        })
        .collect()
}

/// Splits a description on `?` and parses every non-blank clause.
/// Error indices count blank clauses too.
pub fn parse_sequence(text: &str) -> Result<Vec<Clause>, CompileError> {
    Ok(parse_indexed(text)?
        .into_iter()
        .map(|(_, clause)| clause)
        .collect())
}

/// Compiles an effect description into a merged, time-ordered timeline.
///
/// Actions landing on the same millisecond share one entry, in clause order.
/// The timeline always ends with a single `Stop`, [`STOP_TAIL_MS`] after the
/// last scheduled instant.
pub fn compile(text: &str) -> Result<Timeline, CompileError> {
    compile_with(text, &CompileLimits::default())
}

pub fn compile_with(text: &str, limits: &CompileLimits) -> Result<Timeline, CompileError> {
    let clauses = parse_indexed(text)?;
    for (index, clause) in &clauses {
        clause.check(limits).map_err(|reason| CompileError::Malformed {
            index: *index,
            reason,
        })?;
    }

    let mut groups: BTreeMap<Millis, Vec<Action>> = BTreeMap::new();
    for (_, clause) in &clauses {
        clause.expand(&mut groups);
    }

    Timeline::from_groups(groups, STOP_TAIL_MS).ok_or(CompileError::Empty)
}
