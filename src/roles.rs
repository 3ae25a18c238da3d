use std::fmt;

use itertools::Itertools;
use log::debug;
use serde::Serialize;

use crate::{
    data::ColumnType,
    dataset::{Column, Dataset},
    error::PipelineError,
};

/// Measures need strictly more distinct values than this.
pub const MEASURE_MIN_DISTINCT: usize = 10;
/// Groups need strictly fewer distinct values than this.
pub const GROUP_MAX_DISTINCT: usize = 50;
const DATE_NAME_TOKEN: &str = "date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    #[serde(rename = "date")]
    DateLike,
    Measure,
    Group,
}

impl ColumnRole {
    pub const ALL: [ColumnRole; 3] = [ColumnRole::DateLike, ColumnRole::Measure, ColumnRole::Group];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnRole::DateLike => "date",
            ColumnRole::Measure => "measure",
            ColumnRole::Group => "group",
        }
    }

    fn requirement(&self) -> &'static str {
        match self {
            ColumnRole::DateLike => "rename a column so its name contains 'date'",
            ColumnRole::Measure => "a numeric column with more than 10 distinct values is required",
            ColumnRole::Group => "a text column with fewer than 50 distinct values is required",
        }
    }
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub datatype: ColumnType,
    pub distinct: usize,
    pub missing: usize,
    pub roles: Vec<ColumnRole>,
}

impl ColumnProfile {
    pub fn of(column: &Column) -> Self {
        let distinct = column.distinct_count();
        let mut roles = Vec::new();
        if column.name.to_lowercase().contains(DATE_NAME_TOKEN) {
            roles.push(ColumnRole::DateLike);
        }
        if column.datatype.is_numeric() && distinct > MEASURE_MIN_DISTINCT {
            roles.push(ColumnRole::Measure);
        }
        if column.datatype == ColumnType::Text && distinct < GROUP_MAX_DISTINCT {
            roles.push(ColumnRole::Group);
        }
        Self {
            name: column.name.clone(),
            datatype: column.datatype,
            distinct,
            missing: column.missing_count(),
            roles,
        }
    }

    pub fn has_role(&self, role: ColumnRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_unclassified(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Candidate columns per role, in dataset order, plus the profiles they were
/// derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRoleSet {
    pub profiles: Vec<ColumnProfile>,
    pub date_candidates: Vec<String>,
    pub measure_candidates: Vec<String>,
    pub group_candidates: Vec<String>,
}

pub fn classify(dataset: &Dataset) -> ColumnRoleSet {
    let profiles = dataset
        .columns()
        .iter()
        .map(ColumnProfile::of)
        .collect::<Vec<_>>();
    let names_with = |role: ColumnRole| {
        profiles
            .iter()
            .filter(|profile| profile.has_role(role))
            .map(|profile| profile.name.clone())
            .collect::<Vec<_>>()
    };
    let role_set = ColumnRoleSet {
        date_candidates: names_with(ColumnRole::DateLike),
        measure_candidates: names_with(ColumnRole::Measure),
        group_candidates: names_with(ColumnRole::Group),
        profiles,
    };
    debug!(
        "Role candidates: date=[{}] measure=[{}] group=[{}]",
        role_set.date_candidates.join(", "),
        role_set.measure_candidates.join(", "),
        role_set.group_candidates.join(", ")
    );
    role_set
}

/// Requested column per role; `None` picks the first candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionRequest<'a> {
    pub date: Option<&'a str>,
    pub measure: Option<&'a str>,
    pub group: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub date_column: String,
    pub measure_column: String,
    pub group_column: String,
}

impl ColumnRoleSet {
    pub fn candidates(&self, role: ColumnRole) -> &[String] {
        match role {
            ColumnRole::DateLike => &self.date_candidates,
            ColumnRole::Measure => &self.measure_candidates,
            ColumnRole::Group => &self.group_candidates,
        }
    }

    pub fn select(&self, request: &SelectionRequest<'_>) -> Result<Selection, PipelineError> {
        Ok(Selection {
            date_column: self.select_one(ColumnRole::DateLike, request.date)?,
            measure_column: self.select_one(ColumnRole::Measure, request.measure)?,
            group_column: self.select_one(ColumnRole::Group, request.group)?,
        })
    }

    fn select_one(&self, role: ColumnRole, requested: Option<&str>) -> Result<String, PipelineError> {
        let candidates = self.candidates(role);
        match requested {
            Some(name) => {
                if candidates.iter().any(|candidate| candidate == name) {
                    Ok(name.to_string())
                } else if !self.profiles.iter().any(|profile| profile.name == name) {
                    Err(PipelineError::UnknownColumn(name.to_string()))
                } else {
                    Err(PipelineError::NotACandidate {
                        role,
                        column: name.to_string(),
                        candidates: if candidates.is_empty() {
                            "none".to_string()
                        } else {
                            candidates.iter().join(", ")
                        },
                    })
                }
            }
            None => candidates
                .first()
                .cloned()
                .ok_or(PipelineError::NoCandidates {
                    role,
                    hint: role.requirement(),
                }),
        }
    }
}
