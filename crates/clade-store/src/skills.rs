// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use rusqlite::{params, OptionalExtension, Row};

use clade_core::{Skill, SkillStatus};

use crate::error::StoreError;
use crate::Store;

fn status_to_str(s: SkillStatus) -> &'static str {
    match s {
        SkillStatus::Pending => "pending",
        SkillStatus::Active => "active",
        SkillStatus::Disabled => "disabled",
    }
}

fn status_from_str(s: &str) -> SkillStatus {
    match s {
        "active" => SkillStatus::Active,
        "disabled" => SkillStatus::Disabled,
        _ => SkillStatus::Pending,
    }
}

fn row_to_skill(row: &Row) -> rusqlite::Result<Skill> {
    let status: String = row.get("status")?;
    let config: Option<String> = row.get("config")?;
    Ok(Skill {
        name: row.get("name")?,
        status: status_from_str(&status),
        path: row.get("path")?,
        config: config.and_then(|c| serde_json::from_str(&c).ok()),
    })
}

impl Store {
    pub async fn create_skill(&self, skill: Skill) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let config = skill
                .config
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_default());
            conn.execute(
                "INSERT INTO skills (name, status, path, config) VALUES (?1, ?2, ?3, ?4)",
                params![skill.name, status_to_str(skill.status), skill.path, config],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_skill(&self, name: &str) -> Result<Option<Skill>, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM skills WHERE name = ?1", params![name], row_to_skill)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    pub async fn list_skills(&self) -> Result<Vec<Skill>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM skills ORDER BY name")?;
            let rows = stmt.query_map([], row_to_skill)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn approve_skill(&self, name: &str) -> Result<(), StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE skills SET status = 'active' WHERE name = ?1",
                params![name],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("skill {name}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn disable_skill(&self, name: &str) -> Result<(), StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE skills SET status = 'disabled' WHERE name = ?1",
                params![name],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("skill {name}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_skill(&self, name: &str) -> Result<(), StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM skills WHERE name = ?1", params![name])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str) -> Skill {
        Skill {
            name: name.to_string(),
            status: SkillStatus::Pending,
            path: format!("skills/pending/{name}/SKILL.md"),
            config: None,
        }
    }

    #[tokio::test]
    async fn create_then_approve_transitions_status() {
        let store = Store::open_in_memory().unwrap();
        store.create_skill(skill("git-workflow")).await.unwrap();
        store.approve_skill("git-workflow").await.unwrap();
        let fetched = store.get_skill("git-workflow").await.unwrap().unwrap();
        assert_eq!(fetched.status, SkillStatus::Active);
    }

    #[tokio::test]
    async fn disable_unknown_skill_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.disable_skill("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_skills_sorted_by_name() {
        let store = Store::open_in_memory().unwrap();
        store.create_skill(skill("zeta")).await.unwrap();
        store.create_skill(skill("alpha")).await.unwrap();
        let names: Vec<_> = store
            .list_skills()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[tokio::test]
    async fn config_round_trips_through_json() {
        let store = Store::open_in_memory().unwrap();
        let mut s = skill("configured");
        s.config = Some(serde_json::json!({"level": 3}));
        store.create_skill(s).await.unwrap();
        let fetched = store.get_skill("configured").await.unwrap().unwrap();
        assert_eq!(fetched.config.unwrap()["level"], 3);
    }
}
