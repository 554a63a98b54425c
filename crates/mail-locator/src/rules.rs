//! Per-provider UI location rules.
//!
//! These are configuration, not logic: the locator consumes one record per
//! provider and never branches on the provider name itself. Selectors track
//! the live webmail frontends and are expected to rot; when they do, the
//! adaptive fallback path carries the job.

use inboxshot_core_types::Provider;
use serde::{Deserialize, Serialize};

/// How a search result is opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenStyle {
    /// Programmatic element click.
    StandardClick,
    /// Literal pointer click at the element's visual center; for UIs that
    /// intercept synthetic click events.
    PointerCenterClick,
}

/// Fixed-shape locator configuration for one provider.
#[derive(Clone, Debug, Serialize)]
pub struct ProviderRules {
    pub provider: Provider,
    pub inbox_url: &'static str,
    pub search_field: &'static str,
    pub search_result: &'static str,
    pub message_body: &'static str,
    pub open_style: OpenStyle,
}

pub fn rules_for(provider: Provider) -> &'static ProviderRules {
    match provider {
        Provider::Gmail => &GMAIL,
        Provider::Outlook => &OUTLOOK,
        Provider::Yahoo => &YAHOO,
        Provider::Aol => &AOL,
        Provider::Icloud => &ICLOUD,
    }
}

static GMAIL: ProviderRules = ProviderRules {
    provider: Provider::Gmail,
    inbox_url: "https://mail.google.com/mail/u/0/#inbox",
    search_field: "input[aria-label='Search mail']",
    search_result: "tr.zA",
    message_body: "div.a3s",
    open_style: OpenStyle::StandardClick,
};

static OUTLOOK: ProviderRules = ProviderRules {
    provider: Provider::Outlook,
    inbox_url: "https://outlook.live.com/mail/0/",
    search_field: "input#topSearchInput",
    search_result: "div[role='listbox'] div[role='option']",
    message_body: "div[aria-label='Message body']",
    open_style: OpenStyle::StandardClick,
};

static YAHOO: ProviderRules = ProviderRules {
    provider: Provider::Yahoo,
    inbox_url: "https://mail.yahoo.com/",
    search_field: "input[role='combobox'][placeholder*='Search']",
    search_result: "a[data-test-id='message-list-item']",
    message_body: "div[data-test-id='message-view-body']",
    open_style: OpenStyle::StandardClick,
};

static AOL: ProviderRules = ProviderRules {
    provider: Provider::Aol,
    inbox_url: "https://mail.aol.com/",
    search_field: "input[role='combobox'][placeholder*='Search']",
    search_result: "a[data-test-id='message-list-item']",
    message_body: "div[data-test-id='message-view-body']",
    open_style: OpenStyle::StandardClick,
};

// iCloud's search field is a web component that swallows synthetic events;
// both focusing it and opening results require real pointer clicks.
static ICLOUD: ProviderRules = ProviderRules {
    provider: Provider::Icloud,
    inbox_url: "https://www.icloud.com/mail",
    search_field: "ui-autocomplete-token-field input",
    search_result: "div.thread-list-item",
    message_body: "div.mail-message-pane iframe",
    open_style: OpenStyle::PointerCenterClick,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_has_rules() {
        for provider in Provider::ALL {
            let rules = rules_for(provider);
            assert_eq!(rules.provider, provider);
            assert!(rules.inbox_url.starts_with("https://"));
            assert!(!rules.search_field.is_empty());
            assert!(!rules.search_result.is_empty());
            assert!(!rules.message_body.is_empty());
        }
    }

    #[test]
    fn only_icloud_needs_pointer_clicks() {
        for provider in Provider::ALL {
            let expected = if provider == Provider::Icloud {
                OpenStyle::PointerCenterClick
            } else {
                OpenStyle::StandardClick
            };
            assert_eq!(rules_for(provider).open_style, expected);
        }
    }
}
