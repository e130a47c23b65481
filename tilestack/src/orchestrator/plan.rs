//! Task enumeration.
//!
//! A run is the cross product of tiles and time windows. Each task computes
//! every configured statistic, so its artifact paths are known up front and
//! two tasks (or two statistics) rendering to the same file are rejected
//! before anything runs.

use crate::grid::TileIndex;
use crate::output::{ArtifactSpec, OutputWriter};
use crate::statistic::Statistic;
use crate::window::TimeWindow;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A statistic paired with its output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticOutput {
    pub statistic: Statistic,
    pub artifact: ArtifactSpec,
}

/// One unit of work: a tile over a time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Task {
    pub tile: TileIndex,
    pub window: TimeWindow,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile {} {}", self.tile, self.window)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Output path collision: {path} is produced by both {first} and {second}")]
    PathCollision {
        path: PathBuf,
        first: String,
        second: String,
    },
}

/// A task with the artifact path of every statistic, in statistic order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub task: Task,
    pub paths: Vec<PathBuf>,
}

/// Every task of a run, ordered by window then tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPlan {
    tasks: Vec<PlannedTask>,
}

impl TaskPlan {
    /// Enumerates tiles × windows and renders every artifact path.
    pub fn new(
        tiles: &[TileIndex],
        windows: impl IntoIterator<Item = TimeWindow>,
        statistics: &[StatisticOutput],
        writer: &OutputWriter,
    ) -> Result<Self, PlanError> {
        let mut seen: HashMap<PathBuf, String> = HashMap::new();
        let mut tasks = Vec::new();

        for window in windows {
            for &tile in tiles {
                let task = Task { tile, window };
                let mut paths = Vec::with_capacity(statistics.len());
                for output in statistics {
                    let path = writer.path_for(
                        &output.artifact,
                        tile,
                        &window,
                        &output.statistic.name,
                    );
                    let owner = format!("{} ({})", task, output.statistic.name);
                    if let Some(first) = seen.insert(path.clone(), owner.clone()) {
                        return Err(PlanError::PathCollision {
                            path,
                            first,
                            second: owner,
                        });
                    }
                    paths.push(path);
                }
                tasks.push(PlannedTask { task, paths });
            }
        }

        Ok(Self { tasks })
    }

    pub fn tasks(&self) -> &[PlannedTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Total number of artifacts the plan would write.
    pub fn artifact_count(&self) -> usize {
        self.tasks.iter().map(|t| t.paths.len()).sum()
    }
}
