//! Interpretation of untagged server responses seen during IDLE.

use imap_proto::{MailboxDatum, Response, Status};

use super::MailboxEvent;

/// Map an untagged response to the event the engine cares about.
///
/// EXISTS means new mail; BYE means the server is closing the connection
/// and staying in IDLE would deadlock. Everything else (EXPUNGE, RECENT,
/// FETCH flag updates) is deliberately ignored: the resync pass after the
/// next EXISTS covers them, and downstream dedupes by UID anyway.
pub fn classify_untagged(response: &Response<'_>) -> Option<MailboxEvent> {
    match response {
        Response::MailboxData(MailboxDatum::Exists(_)) => Some(MailboxEvent::NewMail),
        Response::Data {
            status: Status::Bye,
            ..
        } => Some(MailboxEvent::Bye),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_is_new_mail() {
        let response = Response::MailboxData(MailboxDatum::Exists(42));
        assert_eq!(classify_untagged(&response), Some(MailboxEvent::NewMail));
    }

    #[test]
    fn test_bye_is_reported() {
        let response = Response::Data {
            status: Status::Bye,
            code: None,
            information: Some("logging out".into()),
        };
        assert_eq!(classify_untagged(&response), Some(MailboxEvent::Bye));
    }

    #[test]
    fn test_expunge_keeps_idling() {
        let response = Response::Expunge(7);
        assert_eq!(classify_untagged(&response), None);
    }

    #[test]
    fn test_recent_keeps_idling() {
        let response = Response::MailboxData(MailboxDatum::Recent(3));
        assert_eq!(classify_untagged(&response), None);
    }
}
