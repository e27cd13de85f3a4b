// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Polkit authorization for the privileged operations.
//!
//! Root callers pass immediately; everyone else is checked against the
//! polkit authority with the caller's bus name as subject. The interactive
//! authorization flag on the incoming message is honored, so agents may
//! prompt when the client allows it.

use std::collections::HashMap;

use tracing::{debug, warn};
use zbus::message::Header;
use zbus::names::BusName;
use zbus::zvariant::Value;
use zbus::{fdo, Connection};

pub const ACTION_CHECK: &str = "org.freedesktop.sysupdate1.check";
pub const ACTION_UPDATE: &str = "org.freedesktop.sysupdate1.update";
pub const ACTION_UPDATE_TO_VERSION: &str = "org.freedesktop.sysupdate1.update-to-version";
pub const ACTION_VACUUM: &str = "org.freedesktop.sysupdate1.vacuum";

const ALLOW_USER_INTERACTION: u32 = 1;

#[zbus::proxy(
    interface = "org.freedesktop.PolicyKit1.Authority",
    default_service = "org.freedesktop.PolicyKit1",
    default_path = "/org/freedesktop/PolicyKit1/Authority"
)]
trait Authority {
    #[allow(clippy::type_complexity)]
    fn check_authorization(
        &self,
        subject: &(&str, HashMap<&str, Value<'_>>),
        action_id: &str,
        details: HashMap<&str, &str>,
        flags: u32,
        cancellation_id: &str,
    ) -> zbus::Result<(bool, bool, HashMap<String, String>)>;
}

/// Verify that the sender of `header` may perform `action`.
///
/// `details` is forwarded to the authority for use in policy rules and
/// authentication prompts.
pub async fn check(
    conn: &Connection,
    header: &Header<'_>,
    action: &str,
    details: &[(&str, &str)],
) -> Result<(), fdo::Error> {
    let Some(sender) = header.sender() else {
        return Err(fdo::Error::AccessDenied("cannot identify method caller".to_string()));
    };

    let dbus = fdo::DBusProxy::new(conn)
        .await
        .map_err(|e| fdo::Error::AccessDenied(e.to_string()))?;
    let uid = dbus
        .get_connection_unix_user(BusName::from(sender.clone()))
        .await
        .map_err(|e| fdo::Error::AccessDenied(e.to_string()))?;
    if uid == 0 {
        return Ok(());
    }

    let interactive =
        header.primary().flags().contains(zbus::message::Flags::AllowInteractiveAuth);
    let flags = if interactive { ALLOW_USER_INTERACTION } else { 0 };

    let mut subject_details: HashMap<&str, Value<'_>> = HashMap::new();
    subject_details.insert("name", Value::from(sender.as_str()));
    let subject = ("system-bus-name", subject_details);

    let authority = AuthorityProxy::new(conn)
        .await
        .map_err(|e| fdo::Error::AccessDenied(e.to_string()))?;
    match authority
        .check_authorization(&subject, action, details.iter().copied().collect(), flags, "")
        .await
    {
        Ok((true, _, _)) => {
            debug!(sender = sender.as_str(), action, "authorized by polkit");
            Ok(())
        }
        Ok((false, _, _)) => {
            Err(fdo::Error::AccessDenied(format!("Access denied by policy for {action}")))
        }
        Err(e) => {
            warn!(action, error = %e, "polkit authorization unavailable, denying");
            Err(fdo::Error::AccessDenied(format!("Cannot authorize {action}: {e}")))
        }
    }
}
