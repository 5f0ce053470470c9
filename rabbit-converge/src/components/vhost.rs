//! Vhost existence. Vhosts have no mutable properties, so the only
//! operation is creating a missing one.

use rabbit_admin::{RabbitManager, VhostSettings};
use tracing::{debug, info};

use super::{expect_status, PassContext, Step, CREATED, DELETED};
use crate::error::ConvergeError;
use crate::status::VHOST_READY;

pub async fn converge(
    manager: &dyn RabbitManager,
    ctx: &mut PassContext<'_>,
    vhost: &str,
) -> Result<Step, ConvergeError> {
    ctx.conditions.set_unknown(VHOST_READY, "Unknown");

    let create = match manager.get_vhost(vhost).await {
        Ok(_) => false,
        Err(e) if e.is_not_found() => true,
        Err(e) => {
            return Err(ConvergeError::dependency(
                format!("error getting vhost {}", vhost),
                e,
            ))
        }
    };

    if create {
        let response = manager
            .put_vhost(vhost, &VhostSettings::default())
            .await
            .map_err(|e| ConvergeError::dependency(format!("error creating vhost {}", vhost), e))?;
        expect_status(&response, CREATED, || format!("unable to create vhost {}", vhost))?;

        info!(vhost = %vhost, "created vhost");
        ctx.record("VhostCreated", format!("RabbitMQ vhost {} created", vhost))
            .await;
    } else {
        debug!(vhost = %vhost, "vhost exists");
    }

    ctx.conditions.set_true(
        VHOST_READY,
        "VhostExists",
        format!("RabbitMQ vhost {} exists", vhost),
    );
    Ok(Step::done())
}

/// Delete the vhost and everything in it.
pub async fn finalize(manager: &dyn RabbitManager, vhost: &str) -> Result<(), ConvergeError> {
    let response = manager
        .delete_vhost(vhost)
        .await
        .map_err(|e| ConvergeError::dependency(format!("error deleting vhost {}", vhost), e))?;
    expect_status(&response, DELETED, || format!("unable to delete vhost {}", vhost))?;
    info!(vhost = %vhost, "deleted vhost");
    Ok(())
}
