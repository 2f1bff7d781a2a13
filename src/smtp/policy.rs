//! Sender and recipient filtering

/// Read-only filter lists shared by every session of a server.
///
/// Entries are lower-cased once at construction so lookups are plain
/// comparisons against an already lower-cased address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    sender_blacklist: Vec<String>,
    recipient_whitelist: Vec<String>,
}

impl Policy {
    pub fn new<B, W>(sender_blacklist: B, recipient_whitelist: W) -> Self
    where
        B: IntoIterator,
        B::Item: AsRef<str>,
        W: IntoIterator,
        W::Item: AsRef<str>,
    {
        Self {
            sender_blacklist: normalize(sender_blacklist),
            recipient_whitelist: normalize(recipient_whitelist),
        }
    }

    /// Whether mail from `sender` must be refused.
    pub fn is_sender_blocked(&self, sender: &str) -> bool {
        let sender = sender.to_lowercase();
        self.sender_blacklist.iter().any(|entry| *entry == sender)
    }

    /// Whether mail for `recipient` is accepted. Unknown recipients are denied.
    pub fn is_recipient_allowed(&self, recipient: &str) -> bool {
        let recipient = recipient.to_lowercase();
        !recipient.is_empty() && self.recipient_whitelist.iter().any(|entry| *entry == recipient)
    }

    pub fn sender_blacklist(&self) -> &[String] {
        &self.sender_blacklist
    }

    pub fn recipient_whitelist(&self) -> &[String] {
        &self.recipient_whitelist
    }
}

fn normalize<I>(entries: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    entries
        .into_iter()
        .map(|entry| entry.as_ref().trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}
