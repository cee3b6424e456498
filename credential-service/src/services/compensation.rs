use std::sync::Arc;
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::store::UserDirectory;

/// Deletes a just-created user unless disarmed. Covers multi-step sign-ups
/// where a later step fails or the caller's future is dropped mid-flight.
/// Cleanup failures are logged and never replace the original error.
pub struct UserCompensation {
    users: Arc<dyn UserDirectory>,
    user_id: Uuid,
    armed: bool,
}

impl UserCompensation {
    pub fn new(users: Arc<dyn UserDirectory>, user_id: Uuid) -> Self {
        Self {
            users,
            user_id,
            armed: true,
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }

    /// Run the cleanup now, on the caller's task.
    pub async fn compensate(mut self) {
        self.armed = false;
        delete_orphan(self.users.clone(), self.user_id).await;
    }
}

impl Drop for UserCompensation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let users = self.users.clone();
        let user_id = self.user_id;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(delete_orphan(users, user_id));
            }
            Err(_) => {
                tracing::error!(user_id = %user_id, "No runtime to delete orphaned user");
            }
        }
    }
}

async fn delete_orphan(users: Arc<dyn UserDirectory>, user_id: Uuid) {
    match users.delete_user(user_id).await {
        Ok(()) => tracing::warn!(user_id = %user_id, "Deleted orphaned user after failed sign-up"),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Failed to delete orphaned user")
        }
    }
}
