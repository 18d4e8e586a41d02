/*!
 * # Stage progression
 *
 * Pure quantity accounting for a part moving through its route. Every stage receives what the
 * previous stage completed (the first stage receives the whole batch); a stage can complete or
 * scrap only what it has received and not yet processed.
 *
 * Nothing here touches the database: callers load the route and the status history, build a
 * [`Progression`] and persist whatever it derives.
 */

use serde::Serialize;
use thiserror::Error;

use crate::entities::{status_history, StatusType};
use crate::errors::ServiceError;

/// Message shown when a part has nothing left to process
pub const ALL_STAGES_COMPLETED: &str = "Все этапы завершены";

/// One stage of a route, in route order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStep {
    pub stage_id: i32,
    pub name: String,
}

/// The part of a status-history row that matters for accounting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEvent {
    pub stage: String,
    pub quantity: i32,
    pub status_type: StatusType,
}

impl From<&status_history::Model> for StageEvent {
    fn from(row: &status_history::Model) -> Self {
        Self {
            stage: row.status.clone(),
            quantity: row.quantity,
            status_type: row.status_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageProgress {
    pub stage_id: i32,
    pub name: String,
    /// Pieces handed to this stage
    pub input: i32,
    pub done: i32,
    pub scrapped: i32,
    pub reworked: i32,
    /// Pieces received but neither completed nor scrapped yet
    pub pending: i32,
    pub state: StageState,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressionError {
    #[error("Количество должно быть больше нуля.")]
    QuantityNotPositive,

    #[error("Этап не входит в маршрут этой детали.")]
    StageNotInRoute,

    #[error("Нельзя отметить {requested} шт. на этапе '{stage}': доступно только {available} шт.")]
    ExceedsPending {
        stage: String,
        requested: i32,
        available: i32,
    },

    #[error("Нельзя отправить на доработку {requested} шт. на этапе '{stage}': выполнено только {available} шт.")]
    ExceedsDone {
        stage: String,
        requested: i32,
        available: i32,
    },
}

impl From<ProgressionError> for ServiceError {
    fn from(err: ProgressionError) -> Self {
        ServiceError::InvalidOperation(err.to_string())
    }
}

/// Per-stage accounting of a part's route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progression {
    pub quantity_total: i32,
    pub stages: Vec<StageProgress>,
}

impl Progression {
    /// Folds the history into per-stage counters. Events for stages outside the route are ignored.
    pub fn compute(quantity_total: i32, route: &[RouteStep], history: &[StageEvent]) -> Self {
        let mut stages = Vec::with_capacity(route.len());
        let mut input = quantity_total;
        let mut scrapped_so_far = 0;

        for step in route {
            let (mut done, mut scrapped, mut reworked) = (0, 0, 0);
            for event in history.iter().filter(|e| e.stage == step.name) {
                match event.status_type {
                    StatusType::Completed => done += event.quantity,
                    StatusType::Scrapped => scrapped += event.quantity,
                    StatusType::Rework => reworked += event.quantity,
                }
            }

            scrapped_so_far += scrapped;
            let pending = input - done - scrapped;
            let state = if done + scrapped_so_far >= quantity_total {
                StageState::Completed
            } else if pending > 0 {
                StageState::InProgress
            } else {
                StageState::Pending
            };

            stages.push(StageProgress {
                stage_id: step.stage_id,
                name: step.name.clone(),
                input,
                done,
                scrapped,
                reworked,
                pending,
                state,
            });
            input = done;
        }

        Self {
            quantity_total,
            stages,
        }
    }

    pub fn stage(&self, stage_id: i32) -> Option<&StageProgress> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    /// First stage in route order that still has pieces to process.
    pub fn next_stage(&self) -> Option<&StageProgress> {
        self.stages.iter().find(|s| s.pending > 0)
    }

    pub fn is_finished(&self) -> bool {
        self.next_stage().is_none()
    }

    /// Checks a confirmation of `quantity` pieces at `stage_id` before it is recorded.
    pub fn validate(
        &self,
        stage_id: i32,
        quantity: i32,
        status_type: StatusType,
    ) -> Result<&StageProgress, ProgressionError> {
        let stage = self
            .stage(stage_id)
            .ok_or(ProgressionError::StageNotInRoute)?;

        if quantity < 1 {
            return Err(ProgressionError::QuantityNotPositive);
        }

        match status_type {
            StatusType::Completed | StatusType::Scrapped if quantity > stage.pending => {
                Err(ProgressionError::ExceedsPending {
                    stage: stage.name.clone(),
                    requested: quantity,
                    available: stage.pending.max(0),
                })
            }
            StatusType::Rework if quantity > stage.done => Err(ProgressionError::ExceedsDone {
                stage: stage.name.clone(),
                requested: quantity,
                available: stage.done,
            }),
            _ => Ok(stage),
        }
    }

    /// Pieces that passed the last stage of the route.
    pub fn quantity_completed(&self) -> i32 {
        self.stages.last().map(|s| s.done).unwrap_or(0)
    }

    pub fn quantity_scrapped(&self) -> i32 {
        self.stages.iter().map(|s| s.scrapped).sum()
    }

    /// False when some stage processed more than it received.
    pub fn is_consistent(&self) -> bool {
        self.stages.iter().all(|s| s.pending >= 0)
    }
}
