//! Detected events and their rendered messages

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::config::MessageTemplates;
use crate::sales::SalesDiff;
use crate::snapshot::SaleRecord;
use crate::terminals::TerminalDiff;

/// Something worth telling subscribers about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    NewSale(SaleRecord),
    TerminalProblem {
        name: String,
        count: u32,
        /// Count at the previous poll when the problem got worse
        previous: Option<u32>,
    },
    TerminalResolved {
        name: String,
    },
}

impl Event {
    /// Short label used in logs and delivery reports
    pub fn label(&self) -> String {
        match self {
            Event::NewSale(sale) => format!("sale #{}", sale.id),
            Event::TerminalProblem { name, .. } => format!("problem on {}", name),
            Event::TerminalResolved { name } => format!("{} resolved", name),
        }
    }
}

/// An event with its message text ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub event: Event,
    pub text: String,
}

/// Collect a tick's events in notification order: sales oldest first, then
/// new problems, worsened terminals and resolved terminals, each by name.
pub fn collect_events(sales: &SalesDiff, terminals: &TerminalDiff) -> Vec<Event> {
    let mut events: Vec<Event> = sales.new_sales.iter().cloned().map(Event::NewSale).collect();

    events.extend(
        terminals
            .new_problems
            .iter()
            .map(|(name, count)| Event::TerminalProblem {
                name: name.clone(),
                count: *count,
                previous: None,
            }),
    );
    events.extend(terminals.worsened.iter().map(|w| Event::TerminalProblem {
        name: w.name.clone(),
        count: w.new_count,
        previous: Some(w.old_count),
    }));
    events.extend(
        terminals
            .resolved
            .iter()
            .map(|name| Event::TerminalResolved { name: name.clone() }),
    );

    events
}

/// Renders events with the configured templates
#[derive(Debug, Clone)]
pub struct Renderer {
    templates: MessageTemplates,
    terminals_link: String,
    placeholder: Regex,
}

impl Renderer {
    pub fn new(templates: MessageTemplates, terminals_link: String) -> crate::Result<Self> {
        let placeholder = Regex::new(r"\{(\w+)\}").map_err(|e| {
            crate::VendwatchError::Config(format!("Invalid placeholder pattern: {}", e))
        })?;
        Ok(Self {
            templates,
            terminals_link,
            placeholder,
        })
    }

    /// Substitute every known `{name}` in one pass. Values are inserted
    /// verbatim; unknown placeholders are left as written.
    fn fill(&self, template: &str, values: &[(&str, &str)]) -> String {
        self.placeholder
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                values
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
            })
            .into_owned()
    }

    pub fn render(&self, event: &Event) -> RenderedMessage {
        let text = match event {
            Event::NewSale(sale) => {
                let payment = sale.payment_method.to_string();
                self.fill(
                    &self.templates.new_sale,
                    &[
                        ("id", sale.id.as_str()),
                        ("address", sale.address.as_str()),
                        ("time", sale.occurred_at.as_str()),
                        ("volume", sale.volume_liters.as_str()),
                        ("amount", sale.amount.as_str()),
                        ("payment", payment.as_str()),
                    ],
                )
            }
            Event::TerminalProblem {
                name,
                count,
                previous,
            } => {
                let count = count.to_string();
                let previous = previous.map(|p| p.to_string()).unwrap_or_default();
                self.fill(
                    &self.templates.terminal_problem,
                    &[
                        ("terminal", name.as_str()),
                        ("count", count.as_str()),
                        ("previous", previous.as_str()),
                        ("link", self.terminals_link.as_str()),
                    ],
                )
            }
            Event::TerminalResolved { name } => self.fill(
                &self.templates.terminal_resolved,
                &[("terminal", name.as_str()), ("link", self.terminals_link.as_str())],
            ),
        };

        RenderedMessage {
            event: event.clone(),
            text,
        }
    }

    pub fn render_all(&self, events: &[Event]) -> Vec<RenderedMessage> {
        events.iter().map(|e| self.render(e)).collect()
    }
}
