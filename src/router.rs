//! The notification router.
//!
//! A pure mapping from "which subscribers watch this account, relative to
//! the admin" to a set of delivery targets. The router never talks to a
//! messenger transport itself — it returns an inert `Vec<RoutedNotification>`
//! the caller hands off to whatever front end is wired up outside the core.

use crate::classifier::{ClassifiedEvent, ClassifiedKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Broadcast,
    AdminDm,
}

#[derive(Debug, Clone)]
pub struct RoutedNotification {
    pub destination: Destination,
    pub body: String,
}

/// Renders the delivery targets for one event, given which subscribers
/// (other than the admin) also watch the account.
///
/// `admin_watches` / `others_watch` being both false is unreachable per the
/// data model (a watch with zero subscribers is removed) but is handled as
/// "no delivery" rather than panicking, since the router must not be the
/// thing that takes the scheduler down.
pub fn route(
    account: &str,
    event: &ClassifiedEvent,
    signature: &str,
    block_time: Option<i64>,
    admin_watches: bool,
    others_watch: bool,
) -> Vec<RoutedNotification> {
    let mut out = Vec::new();

    match (admin_watches, others_watch) {
        (true, true) => {
            out.push(RoutedNotification {
                destination: Destination::Broadcast,
                body: render_body(account, event, signature, block_time, None),
            });
            out.push(RoutedNotification {
                destination: Destination::AdminDm,
                body: render_body(account, event, signature, block_time, Some("also watched by users")),
            });
        }
        (true, false) => {
            out.push(RoutedNotification {
                destination: Destination::AdminDm,
                body: render_body(account, event, signature, block_time, Some("only yours")),
            });
        }
        (false, true) => {
            out.push(RoutedNotification {
                destination: Destination::Broadcast,
                body: render_body(account, event, signature, block_time, None),
            });
        }
        (false, false) => {}
    }

    out
}

fn render_body(
    account: &str,
    event: &ClassifiedEvent,
    signature: &str,
    block_time: Option<i64>,
    tag: Option<&str>,
) -> String {
    let icon = match event.kind {
        ClassifiedKind::Receive => "\u{1F7E2}",
        ClassifiedKind::Send => "\u{1F534}",
        ClassifiedKind::Trade => "\u{1F504}",
        ClassifiedKind::Generic => "\u{26AA}",
    };
    let kind_label = match event.kind {
        ClassifiedKind::Receive => "receive",
        ClassifiedKind::Send => "send",
        ClassifiedKind::Trade => "trade",
        ClassifiedKind::Generic => "generic",
    };

    let mut body = format!(
        "{icon} {kind_label} {:+.9} SOL\naccount: {} ({})\nsignature: {signature}\nblock-time: {}",
        event.amount_sol,
        truncate(account),
        account,
        block_time.map(|t| t.to_string()).unwrap_or_else(|| "unknown".to_string()),
    );

    if let ClassifiedKind::Send = event.kind {
        if let Some(cp) = &event.counterparty {
            body.push_str(&format!("\ncounterparty: {} ({})", truncate(cp), cp));
        }
    }

    if let Some(tag) = tag {
        body.push_str(&format!("\n[{tag}]"));
    }

    body
}

fn truncate(address: &str) -> String {
    if address.len() <= 8 {
        address.to_string()
    } else {
        format!("{}...{}", &address[..4], &address[address.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: ClassifiedKind) -> ClassifiedEvent {
        ClassifiedEvent {
            delta_lamports: 500_000_000,
            amount_sol: 0.5,
            kind,
            counterparty: None,
        }
    }

    #[test]
    fn both_watch_yields_broadcast_and_admin_dm() {
        let e = event(ClassifiedKind::Receive);
        let routed = route("Acct111111111111111111111111111111111111", &e, "sig", Some(1_700_000_000), true, true);
        assert_eq!(routed.len(), 2);
        assert!(routed.iter().any(|r| r.destination == Destination::Broadcast));
        assert!(routed.iter().any(|r| r.destination == Destination::AdminDm));
    }

    #[test]
    fn only_admin_watches_yields_admin_dm_only() {
        let e = event(ClassifiedKind::Receive);
        let routed = route("Acct111111111111111111111111111111111111", &e, "sig", Some(1_700_000_000), true, false);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].destination, Destination::AdminDm);
    }

    #[test]
    fn only_others_watch_yields_broadcast_only() {
        let e = event(ClassifiedKind::Receive);
        let routed = route("Acct111111111111111111111111111111111111", &e, "sig", Some(1_700_000_000), false, true);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].destination, Destination::Broadcast);
    }

    #[test]
    fn nobody_watching_yields_no_delivery() {
        let e = event(ClassifiedKind::Receive);
        let routed = route("Acct111111111111111111111111111111111111", &e, "sig", Some(1_700_000_000), false, false);
        assert!(routed.is_empty());
    }

    #[test]
    fn truncation_keeps_short_addresses_intact() {
        assert_eq!(truncate("short"), "short");
    }
}
