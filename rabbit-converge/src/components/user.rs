//! User upsert.
//!
//! The stored credential is checked by recomputing it with the desired
//! password; tags are compared as a set. Any difference rewrites the user
//! with a freshly salted digest. A brand new user is not usable for
//! permission checks straight away, so creation ends the pass early and asks
//! to be run again after the settle delay.

use std::collections::BTreeSet;

use rabbit_admin::{RabbitManager, UserInfo, UserSettings, UserTags};
use tracing::{debug, info};

use super::{expect_status, expect_success, PassContext, Step, DELETED};
use crate::error::ConvergeError;
use crate::password::{hash_password, verify_password, HashingAlgorithm};
use crate::status::USER_READY;

/// Whether two tag lists hold the same tags, ignoring order and blanks.
pub fn tags_match(desired: &UserTags, observed: &UserTags) -> bool {
    let desired: BTreeSet<&str> = desired.iter().collect();
    let observed: BTreeSet<&str> = observed.iter().collect();
    desired == observed
}

/// Whether the observed user already holds `password` and `tags`.
pub fn is_current(
    observed: &UserInfo,
    password: &str,
    tags: &UserTags,
) -> Result<bool, ConvergeError> {
    if !tags_match(tags, &observed.tags) {
        return Ok(false);
    }
    let algorithm = HashingAlgorithm::from_name(&observed.hashing_algorithm)?;
    Ok(verify_password(&observed.password_hash, password, algorithm))
}

pub async fn converge(
    manager: &dyn RabbitManager,
    ctx: &mut PassContext<'_>,
    username: &str,
    tags: &str,
    password: &str,
) -> Result<Step, ConvergeError> {
    ctx.conditions.set_unknown(USER_READY, "Unknown");
    let tags = UserTags::parse(tags);

    let (create, update) = match manager.get_user(username).await {
        Ok(observed) => (false, !is_current(&observed, password, &tags)?),
        Err(e) if e.is_not_found() => (true, false),
        Err(e) => {
            return Err(ConvergeError::dependency(
                format!("error getting user {}", username),
                e,
            ))
        }
    };

    if create || update {
        let algorithm = ctx.config.hashing_algorithm;
        let settings = UserSettings {
            password_hash: hash_password(password, algorithm),
            hashing_algorithm: algorithm.as_str().to_string(),
            tags,
        };
        let response = manager
            .put_user(username, &settings)
            .await
            .map_err(|e| ConvergeError::dependency(format!("error putting user {}", username), e))?;
        expect_success(&response, || format!("error putting user {}", username))?;

        let (reason, verb) = if create {
            ("UserCreated", "created")
        } else {
            ("UserUpdated", "updated")
        };
        info!(user = %username, "{} user", verb);
        ctx.record(reason, format!("RabbitMQ user {} {}", username, verb))
            .await;

        if create {
            ctx.conditions.set_false(
                USER_READY,
                "UserPending",
                format!("RabbitMQ user {} has been created", username),
            );
            return Ok(Step::settle(ctx.config.user_settle_delay()));
        }
    } else {
        debug!(user = %username, "user is current");
    }

    ctx.conditions.set_true(
        USER_READY,
        "UserExists",
        format!("RabbitMQ user {} exists", username),
    );
    Ok(Step::done())
}

pub async fn finalize(manager: &dyn RabbitManager, username: &str) -> Result<(), ConvergeError> {
    let response = manager
        .delete_user(username)
        .await
        .map_err(|e| ConvergeError::dependency(format!("error deleting user {}", username), e))?;
    expect_status(&response, DELETED, || format!("unable to delete user {}", username))?;
    info!(user = %username, "deleted user");
    Ok(())
}
