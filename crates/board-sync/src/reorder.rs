//! Priority reordering: turn a move inside a (possibly filtered) view into
//! new priorities for exactly the projects in that view
use std::collections::HashMap;
use std::sync::Arc;

use crate::{BoardError, EntityId, Project, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// A single-position move within a view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderIntent {
    /// Drag and drop: remove at the current index, reinsert at `target`
    MoveTo { id: EntityId, target: usize },

    /// Up/down control: swap with the adjacent project
    Shift { id: EntityId, direction: Direction },
}

impl ReorderIntent {
    pub fn id(&self) -> &EntityId {
        match self {
            Self::MoveTo { id, .. } | Self::Shift { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityWrite {
    pub id: EntityId,
    pub priority: i64,
}

/// `priority = index + 1` for every project, left to right
pub fn priority_writes(ordered: &[Project]) -> Vec<PriorityWrite> {
    ordered
        .iter()
        .enumerate()
        .map(|(index, project)| PriorityWrite {
            id: project.id.clone(),
            priority: index as i64 + 1,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderPlan {
    /// The view in its new order, priorities already reassigned
    pub view: Vec<Project>,
    pub writes: Vec<PriorityWrite>,
}

/// Compute the new view order. `Ok(None)` means the move changes nothing.
pub fn plan_reorder(view: &[Project], intent: &ReorderIntent) -> Result<Option<ReorderPlan>> {
    let id = intent.id();
    let from = view
        .iter()
        .position(|project| &project.id == id)
        .ok_or_else(|| BoardError::InvalidArgument(format!("project {} is not in the view", id)))?;

    let to = match intent {
        ReorderIntent::MoveTo { target, .. } => {
            if *target >= view.len() {
                return Err(BoardError::InvalidArgument(format!(
                    "target index {} out of range for {} projects",
                    target,
                    view.len()
                )));
            }
            *target
        }
        ReorderIntent::Shift { direction, .. } => match direction {
            Direction::Up => from.checked_sub(1).ok_or_else(|| {
                BoardError::InvalidArgument(format!("project {} is already first", id))
            })?,
            Direction::Down if from + 1 < view.len() => from + 1,
            Direction::Down => {
                return Err(BoardError::InvalidArgument(format!(
                    "project {} is already last",
                    id
                )))
            }
        },
    };

    if from == to {
        return Ok(None);
    }

    let mut reordered = view.to_vec();
    match intent {
        ReorderIntent::MoveTo { .. } => {
            let moved = reordered.remove(from);
            reordered.insert(to, moved);
        }
        ReorderIntent::Shift { .. } => reordered.swap(from, to),
    }

    let writes = priority_writes(&reordered);
    for (project, write) in reordered.iter_mut().zip(&writes) {
        project.priority = write.priority;
    }

    Ok(Some(ReorderPlan {
        view: reordered,
        writes,
    }))
}

/// The full collection with the plan's priorities applied and re-sorted.
/// Projects outside the view keep their priorities.
pub fn apply_plan(collection: &[Project], plan: &ReorderPlan) -> Vec<Project> {
    let priorities: HashMap<&EntityId, i64> = plan
        .writes
        .iter()
        .map(|write| (&write.id, write.priority))
        .collect();

    let mut updated: Vec<Project> = collection
        .iter()
        .map(|project| {
            let mut project = project.clone();
            if let Some(&priority) = priorities.get(&project.id) {
                project.priority = priority;
            }
            project
        })
        .collect();
    updated.sort_by_key(|project| project.priority);
    updated
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderPhase {
    /// Optimistic order visible, batch write in flight
    Applying,
    /// Batch write accepted
    Confirmed,
    /// Batch write failed
    RolledBack,
}

/// One optimistic reorder: `Applying -> Confirmed | RolledBack`
#[derive(Debug)]
pub struct ReorderTransaction {
    phase: ReorderPhase,
    previous: Arc<Vec<Project>>,
    delivered: u64,
}

impl ReorderTransaction {
    /// `previous` is the snapshot the optimistic order replaced, taken after
    /// `delivered` feed deliveries
    pub fn begin(previous: Arc<Vec<Project>>, delivered: u64) -> Self {
        Self {
            phase: ReorderPhase::Applying,
            previous,
            delivered,
        }
    }

    pub fn phase(&self) -> ReorderPhase {
        self.phase
    }

    pub fn previous(&self) -> &Arc<Vec<Project>> {
        &self.previous
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn confirm(&mut self) -> Result<()> {
        self.finish(ReorderPhase::Confirmed)
    }

    pub fn roll_back(&mut self) -> Result<()> {
        self.finish(ReorderPhase::RolledBack)
    }

    fn finish(&mut self, next: ReorderPhase) -> Result<()> {
        if self.phase != ReorderPhase::Applying {
            return Err(BoardError::InvalidArgument(format!(
                "reorder already finished as {:?}",
                self.phase
            )));
        }
        self.phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CreateProjectInput, Entity, ProjectStatus};
    use chrono::Utc;

    fn project(id: &str, priority: i64) -> Project {
        let mut input = CreateProjectInput::new(id);
        input.priority = Some(priority);
        Project::from_create(EntityId::from(id), input, Utc::now())
    }

    fn ids(projects: &[Project]) -> Vec<&str> {
        projects.iter().map(|p| p.id.as_str()).collect()
    }

    fn move_to(id: &str, target: usize) -> ReorderIntent {
        ReorderIntent::MoveTo {
            id: EntityId::from(id),
            target,
        }
    }

    #[test]
    fn test_move_last_to_front() {
        let view = vec![project("P1", 1), project("P2", 2), project("P3", 3)];

        let plan = plan_reorder(&view, &move_to("P3", 0)).unwrap().unwrap();

        assert_eq!(ids(&plan.view), vec!["P3", "P1", "P2"]);
        assert_eq!(
            plan.writes,
            vec![
                PriorityWrite { id: "P3".into(), priority: 1 },
                PriorityWrite { id: "P1".into(), priority: 2 },
                PriorityWrite { id: "P2".into(), priority: 3 },
            ]
        );
        assert_eq!(ids(&apply_plan(&view, &plan)), vec!["P3", "P1", "P2"]);
    }

    #[test]
    fn test_move_shifts_between_positions() {
        let view: Vec<Project> = (1..=5).map(|i| project(&format!("P{}", i), i)).collect();

        let plan = plan_reorder(&view, &move_to("P1", 3)).unwrap().unwrap();
        assert_eq!(ids(&plan.view), vec!["P2", "P3", "P4", "P1", "P5"]);
    }

    #[test]
    fn test_same_position_is_noop() {
        let view = vec![project("P1", 1), project("P2", 2)];
        assert_eq!(plan_reorder(&view, &move_to("P2", 1)).unwrap(), None);
    }

    #[test]
    fn test_shift_swaps_neighbours() {
        let view = vec![project("P1", 1), project("P2", 2), project("P3", 3)];

        let up = ReorderIntent::Shift {
            id: "P3".into(),
            direction: Direction::Up,
        };
        let plan = plan_reorder(&view, &up).unwrap().unwrap();
        assert_eq!(ids(&plan.view), vec!["P1", "P3", "P2"]);

        let down = ReorderIntent::Shift {
            id: "P1".into(),
            direction: Direction::Down,
        };
        let plan = plan_reorder(&view, &down).unwrap().unwrap();
        assert_eq!(ids(&plan.view), vec!["P2", "P1", "P3"]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let view = vec![project("P1", 1), project("P2", 2)];

        assert!(matches!(
            plan_reorder(&view, &move_to("P1", 2)),
            Err(BoardError::InvalidArgument(_))
        ));
        assert!(matches!(
            plan_reorder(&view, &move_to("missing", 0)),
            Err(BoardError::InvalidArgument(_))
        ));

        let first_up = ReorderIntent::Shift {
            id: "P1".into(),
            direction: Direction::Up,
        };
        assert!(plan_reorder(&view, &first_up).is_err());

        let last_down = ReorderIntent::Shift {
            id: "P2".into(),
            direction: Direction::Down,
        };
        assert!(plan_reorder(&view, &last_down).is_err());
    }

    #[test]
    fn test_filtered_view_leaves_hidden_projects() {
        let mut done = project("D", 2);
        done.status = ProjectStatus::Completed;
        let collection = vec![project("A", 1), done, project("B", 3), project("C", 7)];
        let view: Vec<Project> = collection
            .iter()
            .filter(|p| !p.is_completed())
            .cloned()
            .collect();

        let plan = plan_reorder(&view, &move_to("C", 0)).unwrap().unwrap();
        assert_eq!(plan.writes.len(), 3);
        assert!(plan.writes.iter().all(|w| w.id.as_str() != "D"));

        let applied = apply_plan(&collection, &plan);
        let priorities: Vec<(&str, i64)> = applied
            .iter()
            .map(|p| (p.id.as_str(), p.priority))
            .collect();
        // D keeps 2; the tie with A's new 2 keeps collection order
        assert_eq!(priorities, vec![("C", 1), ("A", 2), ("D", 2), ("B", 3)]);
    }

    #[test]
    fn test_transaction_transitions_once() {
        let mut txn = ReorderTransaction::begin(Arc::new(Vec::new()), 3);
        assert_eq!(txn.phase(), ReorderPhase::Applying);
        assert_eq!(txn.delivered(), 3);

        txn.roll_back().unwrap();
        assert_eq!(txn.phase(), ReorderPhase::RolledBack);
        assert!(txn.confirm().is_err());
        assert_eq!(txn.phase(), ReorderPhase::RolledBack);
    }
}
