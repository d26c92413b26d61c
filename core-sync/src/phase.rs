//! # Sync Phase State Machine
//!
//! ```text
//! Init → Extract → Transform → Match → LoadPrimary → LoadMedia
//!      → LoadHierarchy → LoadLinking → Complete
//!
//! any phase ──→ Failed
//! ```
//!
//! Phases only move forward one step at a time. The single exception is a
//! forced rerun, which rewinds to an earlier phase.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Init,
    Extract,
    Transform,
    Match,
    LoadPrimary,
    LoadMedia,
    LoadHierarchy,
    LoadLinking,
    Complete,
    Failed,
}

impl SyncPhase {
    /// Phases that do work, in execution order.
    pub const PIPELINE: [SyncPhase; 7] = [
        SyncPhase::Extract,
        SyncPhase::Transform,
        SyncPhase::Match,
        SyncPhase::LoadPrimary,
        SyncPhase::LoadMedia,
        SyncPhase::LoadHierarchy,
        SyncPhase::LoadLinking,
    ];

    /// Position in the pipeline order. `Failed` sits outside it.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            SyncPhase::Init => Some(0),
            SyncPhase::Extract => Some(1),
            SyncPhase::Transform => Some(2),
            SyncPhase::Match => Some(3),
            SyncPhase::LoadPrimary => Some(4),
            SyncPhase::LoadMedia => Some(5),
            SyncPhase::LoadHierarchy => Some(6),
            SyncPhase::LoadLinking => Some(7),
            SyncPhase::Complete => Some(8),
            SyncPhase::Failed => None,
        }
    }

    pub fn next(&self) -> Option<SyncPhase> {
        match self {
            SyncPhase::Init => Some(SyncPhase::Extract),
            SyncPhase::Extract => Some(SyncPhase::Transform),
            SyncPhase::Transform => Some(SyncPhase::Match),
            SyncPhase::Match => Some(SyncPhase::LoadPrimary),
            SyncPhase::LoadPrimary => Some(SyncPhase::LoadMedia),
            SyncPhase::LoadMedia => Some(SyncPhase::LoadHierarchy),
            SyncPhase::LoadHierarchy => Some(SyncPhase::LoadLinking),
            SyncPhase::LoadLinking => Some(SyncPhase::Complete),
            SyncPhase::Complete | SyncPhase::Failed => None,
        }
    }

    /// Whether `self` comes strictly before `other` in the pipeline.
    pub fn is_before(&self, other: SyncPhase) -> bool {
        match (self.ordinal(), other.ordinal()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Complete | SyncPhase::Failed)
    }

    /// Phases that write to the destination.
    pub fn is_write_phase(&self) -> bool {
        matches!(
            self,
            SyncPhase::LoadPrimary
                | SyncPhase::LoadMedia
                | SyncPhase::LoadHierarchy
                | SyncPhase::LoadLinking
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Init => "init",
            SyncPhase::Extract => "extract",
            SyncPhase::Transform => "transform",
            SyncPhase::Match => "match",
            SyncPhase::LoadPrimary => "load_primary",
            SyncPhase::LoadMedia => "load_media",
            SyncPhase::LoadHierarchy => "load_hierarchy",
            SyncPhase::LoadLinking => "load_linking",
            SyncPhase::Complete => "complete",
            SyncPhase::Failed => "failed",
        }
    }

    /// Check a move from `self` to `to`.
    ///
    /// Allowed: one step forward, anything to `Failed`, and with `forced` a
    /// rewind to an earlier pipeline phase.
    pub fn validate_transition(&self, to: SyncPhase, forced: bool) -> Result<()> {
        let valid = match (*self, to) {
            (_, SyncPhase::Failed) => true,
            (SyncPhase::Failed, _) => false,
            (from, to) if from.next() == Some(to) => true,
            (from, to) if forced => to.is_before(from) && to != SyncPhase::Init,
            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: if forced {
                    "forced reruns may only move backwards".to_string()
                } else {
                    "phases advance one step at a time".to_string()
                },
            });
        }
        Ok(())
    }
}

impl FromStr for SyncPhase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "init" => Ok(SyncPhase::Init),
            "extract" => Ok(SyncPhase::Extract),
            "transform" => Ok(SyncPhase::Transform),
            "match" => Ok(SyncPhase::Match),
            "load_primary" => Ok(SyncPhase::LoadPrimary),
            "load_media" => Ok(SyncPhase::LoadMedia),
            "load_hierarchy" => Ok(SyncPhase::LoadHierarchy),
            "load_linking" => Ok(SyncPhase::LoadLinking),
            "complete" => Ok(SyncPhase::Complete),
            "failed" => Ok(SyncPhase::Failed),
            _ => Err(SyncError::InvalidPhase(s.to_string())),
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
