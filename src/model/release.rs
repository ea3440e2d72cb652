use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Id;

/// Task lifecycle. Variants are declared in progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProcess,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: Id,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub developer_id: Id,
    pub order_index: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Check the timestamp rules that go with the task's status.
    pub fn check_timeline(&self) -> Result<(), String> {
        if self.status != TaskStatus::Todo && self.started_at.is_none() {
            return Err(format!("status {:?} requires startedAt", self.status));
        }

        match (self.status, self.completed_at) {
            (TaskStatus::Completed, None) => {
                Err("status COMPLETED requires completedAt".to_string())
            }
            (TaskStatus::Completed, Some(completed_at)) => match self.started_at {
                Some(started_at) if completed_at < started_at => Err(format!(
                    "completedAt {} is before startedAt {}",
                    completed_at.to_rfc3339(),
                    started_at.to_rfc3339()
                )),
                _ => Ok(()),
            },
            (status, Some(_)) => Err(format!("status {:?} must not carry completedAt", status)),
            (_, None) => Ok(()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// A release and the tasks it owns.
///
/// Task order is carried by `order_index`; array position means nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Release {
    #[serde(rename = "_id")]
    pub id: Id,
    pub title: String,
    pub is_completed: bool,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Release {
    /// Sort embedded tasks into their declared order.
    pub fn normalize_task_order(&mut self) {
        self.tasks.sort_by_key(|task| task.order_index);
    }

    /// Tasks in declared order, without relying on the stored array order.
    pub fn ordered_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.iter().collect();
        tasks.sort_by_key(|task| task.order_index);
        tasks
    }

    pub fn unfinished_tasks(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(status: TaskStatus, started: Option<&str>, completed: Option<&str>) -> Task {
        Task {
            id: "t1".to_string(),
            title: "Task".to_string(),
            description: "Does a thing".to_string(),
            status,
            developer_id: "u1".to_string(),
            order_index: 1,
            started_at: started.map(|s| s.parse().unwrap()),
            completed_at: completed.map(|s| s.parse().unwrap()),
        }
    }

    #[test]
    fn test_status_progression_order() {
        assert!(TaskStatus::Todo < TaskStatus::InProcess);
        assert!(TaskStatus::InProcess < TaskStatus::Completed);
        assert_eq!(serde_json::to_value(TaskStatus::InProcess).unwrap(), json!("IN_PROCESS"));
    }

    #[test]
    fn test_timeline_rules() {
        assert!(task(TaskStatus::Todo, None, None).check_timeline().is_ok());
        assert!(task(TaskStatus::InProcess, Some("2026-01-28T09:00:00Z"), None)
            .check_timeline()
            .is_ok());
        assert!(task(
            TaskStatus::Completed,
            Some("2026-01-05T09:00:00Z"),
            Some("2026-01-06T17:00:00Z")
        )
        .check_timeline()
        .is_ok());

        let err = task(TaskStatus::Completed, Some("2026-01-05T09:00:00Z"), None)
            .check_timeline()
            .unwrap_err();
        assert!(err.contains("completedAt"));

        assert!(task(TaskStatus::InProcess, None, None).check_timeline().is_err());
        assert!(task(TaskStatus::Todo, None, Some("2026-01-06T17:00:00Z"))
            .check_timeline()
            .is_err());
        assert!(task(
            TaskStatus::Completed,
            Some("2026-01-06T17:00:00Z"),
            Some("2026-01-05T09:00:00Z")
        )
        .check_timeline()
        .is_err());
    }

    #[test]
    fn test_timestamps_serialize_as_utc_strings() {
        let task = task(TaskStatus::InProcess, Some("2026-01-28T09:00:00Z"), None);
        let body = serde_json::to_value(&task).unwrap();
        assert_eq!(body["startedAt"], json!("2026-01-28T09:00:00Z"));
        assert_eq!(body["completedAt"], json!(null));
        assert_eq!(body["developerId"], json!("u1"));
    }

    #[test]
    fn test_ordered_tasks_ignore_array_position() {
        let mut first = task(TaskStatus::Todo, None, None);
        first.id = "a".to_string();
        first.order_index = 2;
        let mut second = task(TaskStatus::Todo, None, None);
        second.id = "b".to_string();
        second.order_index = 1;

        let mut release = Release {
            id: "r1".to_string(),
            title: "R".to_string(),
            is_completed: false,
            tasks: vec![first, second],
        };
        let ids: Vec<&str> = release.ordered_tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        release.normalize_task_order();
        assert_eq!(release.tasks[0].id, "b");
        assert_eq!(release.unfinished_tasks(), 2);
    }
}
