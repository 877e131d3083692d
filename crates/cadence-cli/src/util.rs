use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::models::SyncEntity;
use cadence_core::repository::{DomainRepository, InstanceRepository, Repository, TaskRepository};
use uuid::Uuid;

/// IDs print as hyphenated hex; a prefix may include the hyphens.
fn check_length(short_id: &str) -> Result<()> {
    if let Some(c) = short_id.chars().find(|c| !c.is_ascii_hexdigit() && *c != '-') {
        return Err(anyhow!(CoreError::Validation(format!(
            "'{}' is not an ID (unexpected '{}')",
            short_id, c
        ))));
    }
    if short_id.chars().filter(|c| c.is_ascii_hexdigit()).count() < 2 {
        return Err(anyhow!(CoreError::Validation(
            "Short ID must be at least 2 characters long.".to_string()
        )));
    }
    Ok(())
}

pub async fn resolve_task_id(repo: &impl Repository, owner_id: Uuid, short_id: &str) -> Result<Uuid> {
    check_length(short_id)?;
    let tasks = repo.find_tasks_by_short_id_prefix(owner_id, short_id).await?;
    if tasks.len() == 1 {
        Ok(tasks[0].id)
    } else if tasks.is_empty() {
        Err(anyhow!(CoreError::NotFound(format!(
            "No task found with ID prefix '{}'",
            short_id
        ))))
    } else {
        let task_info: Vec<(String, String)> = tasks
            .into_iter()
            .map(|t| (t.id.to_string(), t.title))
            .collect();
        Err(anyhow!(CoreError::AmbiguousId(task_info)))
    }
}

/// Resolve a prefix to an instance, or failing that to a one-off task.
pub async fn resolve_entity(repo: &impl Repository, owner_id: Uuid, short_id: &str) -> Result<SyncEntity> {
    check_length(short_id)?;
    let instances = repo.find_instances_by_short_id_prefix(owner_id, short_id).await?;
    let tasks = repo.find_tasks_by_short_id_prefix(owner_id, short_id).await?;

    let mut matches: Vec<(SyncEntity, String)> = instances
        .into_iter()
        .map(|i| {
            let label = format!("{} on {}", i.title, i.occurrence_date);
            (SyncEntity::instance(i.id), label)
        })
        .collect();
    matches.extend(
        tasks
            .into_iter()
            .map(|t| (SyncEntity::task(t.id), t.title)),
    );

    match matches.len() {
        1 => Ok(matches.remove(0).0),
        0 => Err(anyhow!(CoreError::NotFound(format!(
            "Nothing found with ID prefix '{}'",
            short_id
        )))),
        _ => Err(anyhow!(CoreError::AmbiguousId(
            matches
                .into_iter()
                .map(|(entity, label)| (entity.id.to_string(), label))
                .collect()
        ))),
    }
}

/// Resolve a prefix that must name an instance.
pub async fn resolve_instance_id(repo: &impl Repository, owner_id: Uuid, short_id: &str) -> Result<Uuid> {
    check_length(short_id)?;
    let instances = repo.find_instances_by_short_id_prefix(owner_id, short_id).await?;
    match instances.as_slice() {
        [instance] => Ok(instance.id),
        [] => Err(anyhow!(CoreError::NotFound(format!(
            "No instance found with ID prefix '{}'",
            short_id
        )))),
        _ => Err(anyhow!(CoreError::AmbiguousId(
            instances
                .into_iter()
                .map(|i| (i.id.to_string(), format!("{} on {}", i.title, i.occurrence_date)))
                .collect()
        ))),
    }
}

pub async fn resolve_domain_id(repo: &impl Repository, owner_id: Uuid, name: &str) -> Result<Uuid> {
    match repo.find_domain_by_name(owner_id, name).await? {
        Some(domain) => Ok(domain.id),
        None => Err(anyhow!(CoreError::NotFound(format!(
            "Domain '{}' not found. Create it with `cadence domain add {}`.",
            name, name
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_checks() {
        assert!(check_length("01").is_ok());
        assert!(check_length("0190-ab").is_ok());
        assert!(check_length("f").is_err());
        assert!(check_length("--a").is_err());
        assert!(check_length("zz").is_err());
    }
}
