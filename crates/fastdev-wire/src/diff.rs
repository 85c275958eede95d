use serde::Serialize;

use crate::FlatMap;

/// One difference between an expected and an actual flattened payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldDiff {
    Added {
        path: String,
        value: String,
    },
    Removed {
        path: String,
        value: String,
    },
    Changed {
        path: String,
        expected: String,
        actual: String,
    },
}

impl FieldDiff {
    pub fn path(&self) -> &str {
        match self {
            Self::Added { path, .. } | Self::Removed { path, .. } | Self::Changed { path, .. } => {
                path
            }
        }
    }
}

/// Differences ordered by path.
pub fn diff(expected: &FlatMap, actual: &FlatMap) -> Vec<FieldDiff> {
    let mut out = Vec::new();
    for (path, want) in expected {
        match actual.get(path) {
            None => out.push(FieldDiff::Removed {
                path: path.clone(),
                value: want.clone(),
            }),
            Some(got) if got != want => out.push(FieldDiff::Changed {
                path: path.clone(),
                expected: want.clone(),
                actual: got.clone(),
            }),
            Some(_) => {}
        }
    }
    for (path, got) in actual {
        if !expected.contains_key(path) {
            out.push(FieldDiff::Added {
                path: path.clone(),
                value: got.clone(),
            });
        }
    }
    out.sort_by(|a, b| a.path().cmp(b.path()));
    out
}
