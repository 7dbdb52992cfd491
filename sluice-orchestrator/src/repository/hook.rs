//! Job Hook and Job Button Repository

use serde_json::Value;
use sluice_core::domain::change::ChangeAction;
use sluice_core::domain::hook::{JobButton, JobHook};
use sluice_core::domain::job::ClassPath;
use sqlx::PgPool;
use uuid::Uuid;

// =============================================================================
// Job Hooks
// =============================================================================

pub async fn create_hook(pool: &PgPool, hook: &JobHook) -> Result<(), sqlx::Error> {
    let actions = serde_json::to_value(&hook.actions)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO job_hooks (id, name, class_path, content_types, actions, enabled)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(hook.id)
    .bind(&hook.name)
    .bind(hook.class_path.to_string())
    .bind(&hook.content_types)
    .bind(actions)
    .bind(hook.enabled)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_hooks(pool: &PgPool) -> Result<Vec<JobHook>, sqlx::Error> {
    let rows = sqlx::query_as::<_, HookRow>(
        "SELECT id, name, class_path, content_types, actions, enabled FROM job_hooks ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(JobHook::try_from).collect()
}

/// Enabled hooks listening to `content_type`
pub async fn hooks_for_content_type(
    pool: &PgPool,
    content_type: &str,
) -> Result<Vec<JobHook>, sqlx::Error> {
    let rows = sqlx::query_as::<_, HookRow>(
        r#"
        SELECT id, name, class_path, content_types, actions, enabled
        FROM job_hooks
        WHERE enabled AND $1 = ANY(content_types)
        ORDER BY name
        "#,
    )
    .bind(content_type)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(JobHook::try_from).collect()
}

// =============================================================================
// Job Buttons
// =============================================================================

pub async fn create_button(pool: &PgPool, button: &JobButton) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_buttons (id, name, class_path, content_types, enabled)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(button.id)
    .bind(&button.name)
    .bind(button.class_path.to_string())
    .bind(&button.content_types)
    .bind(button.enabled)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_buttons(pool: &PgPool) -> Result<Vec<JobButton>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ButtonRow>(
        "SELECT id, name, class_path, content_types, enabled FROM job_buttons ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(JobButton::try_from).collect()
}

pub async fn find_button(pool: &PgPool, id: Uuid) -> Result<Option<JobButton>, sqlx::Error> {
    let row = sqlx::query_as::<_, ButtonRow>(
        "SELECT id, name, class_path, content_types, enabled FROM job_buttons WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(JobButton::try_from).transpose()
}

// =============================================================================
// Database Row Types
// =============================================================================

fn parse_class_path(raw: &str) -> Result<ClassPath, sqlx::Error> {
    ClassPath::parse(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[derive(sqlx::FromRow)]
struct HookRow {
    id: Uuid,
    name: String,
    class_path: String,
    content_types: Vec<String>,
    actions: Value,
    enabled: bool,
}

impl TryFrom<HookRow> for JobHook {
    type Error = sqlx::Error;

    fn try_from(row: HookRow) -> Result<Self, Self::Error> {
        let actions: Vec<ChangeAction> =
            serde_json::from_value(row.actions).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(JobHook {
            id: row.id,
            name: row.name,
            class_path: parse_class_path(&row.class_path)?,
            content_types: row.content_types,
            actions,
            enabled: row.enabled,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ButtonRow {
    id: Uuid,
    name: String,
    class_path: String,
    content_types: Vec<String>,
    enabled: bool,
}

impl TryFrom<ButtonRow> for JobButton {
    type Error = sqlx::Error;

    fn try_from(row: ButtonRow) -> Result<Self, Self::Error> {
        Ok(JobButton {
            id: row.id,
            name: row.name,
            class_path: parse_class_path(&row.class_path)?,
            content_types: row.content_types,
            enabled: row.enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_row_decodes_actions() {
        let hook = JobHook::try_from(HookRow {
            id: Uuid::new_v4(),
            name: "log changes".to_string(),
            class_path: "plugins/example_app/ExampleJobHookReceiver".to_string(),
            content_types: vec!["dcim.device".to_string()],
            actions: serde_json::json!(["create", "delete"]),
            enabled: true,
        })
        .unwrap();

        assert_eq!(hook.actions, vec![ChangeAction::Create, ChangeAction::Delete]);
    }

    #[test]
    fn test_button_row_rejects_bad_path() {
        let row = ButtonRow {
            id: Uuid::new_v4(),
            name: "audit".to_string(),
            class_path: "audit".to_string(),
            content_types: Vec::new(),
            enabled: true,
        };
        assert!(JobButton::try_from(row).is_err());
    }
}
