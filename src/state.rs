use std::fmt;

/// Where a session is in the RFC 5321 command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Connection accepted, or STARTTLS just completed. Waiting for EHLO/HELO.
    New,
    /// Greeted, no transaction open.
    Initial,
    /// MAIL accepted, waiting for the first RCPT.
    Mail,
    /// At least one RCPT accepted.
    Recipient,
    /// Reading the message body.
    Data,
}

/// How the current transaction will leave this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Unknown,
    /// The sender is not one of ours: deliver into a local mailbox.
    Inbound,
    /// The sender is one of ours and authenticated: relay to the recipients.
    Outbound,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Delivery::Unknown => "unknown",
            Delivery::Inbound => "inbound",
            Delivery::Outbound => "outbound",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Helo,
    Ehlo,
    StartTls,
    Auth,
    Mail,
    Rcpt,
    Data,
    Rset,
    Quit,
    Vrfy,
    Expn,
    Noop,
    Help,
}

impl Command {
    /// Matches a command verb, ignoring case.
    pub fn parse(verb: &str) -> Option<Self> {
        let command = match verb.to_ascii_uppercase().as_str() {
            "HELO" => Command::Helo,
            "EHLO" => Command::Ehlo,
            "STARTTLS" => Command::StartTls,
            "AUTH" => Command::Auth,
            "MAIL" => Command::Mail,
            "RCPT" => Command::Rcpt,
            "DATA" => Command::Data,
            "RSET" => Command::Rset,
            "QUIT" => Command::Quit,
            "VRFY" => Command::Vrfy,
            "EXPN" => Command::Expn,
            "NOOP" => Command::Noop,
            "HELP" => Command::Help,
            _ => return None,
        };
        Some(command)
    }

    /// The transition table. Anything not listed here is answered with 503
    /// before a handler runs.
    pub fn permitted_in(self, state: State) -> bool {
        match self {
            Command::StartTls | Command::Auth | Command::Mail => state == State::Initial,
            Command::Rcpt => matches!(state, State::Mail | State::Recipient),
            Command::Data => state == State::Recipient,
            Command::Helo
            | Command::Ehlo
            | Command::Rset
            | Command::Quit
            | Command::Vrfy
            | Command::Expn
            | Command::Noop
            | Command::Help => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [State; 5] = [
        State::New,
        State::Initial,
        State::Mail,
        State::Recipient,
        State::Data,
    ];

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Command::parse("ehlo"), Some(Command::Ehlo));
        assert_eq!(Command::parse("StartTLS"), Some(Command::StartTls));
        assert_eq!(Command::parse("RCPT"), Some(Command::Rcpt));
        assert_eq!(Command::parse("TURN"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_transaction_commands() {
        let legal = |command: Command| -> Vec<State> {
            ALL_STATES
                .into_iter()
                .filter(|state| command.permitted_in(*state))
                .collect()
        };

        assert_eq!(legal(Command::StartTls), vec![State::Initial]);
        assert_eq!(legal(Command::Auth), vec![State::Initial]);
        assert_eq!(legal(Command::Mail), vec![State::Initial]);
        assert_eq!(legal(Command::Rcpt), vec![State::Mail, State::Recipient]);
        assert_eq!(legal(Command::Data), vec![State::Recipient]);
    }

    #[test]
    fn test_always_permitted() {
        for command in [
            Command::Helo,
            Command::Ehlo,
            Command::Rset,
            Command::Quit,
            Command::Vrfy,
            Command::Expn,
            Command::Noop,
            Command::Help,
        ] {
            for state in ALL_STATES {
                assert!(command.permitted_in(state), "{command:?} in {state:?}");
            }
        }
    }

    #[test]
    fn test_delivery_display() {
        assert_eq!(Delivery::default(), Delivery::Unknown);
        assert_eq!(Delivery::Inbound.to_string(), "inbound");
        assert_eq!(Delivery::Outbound.to_string(), "outbound");
    }
}
