//! Blocking user dialogs (`alert` / `confirm`).

use std::cell::RefCell;

/// Modal prompts shown to the visitor
pub trait UserDialogs {
    fn alert(&self, message: &str);

    /// Ask a yes/no question
    fn confirm(&self, message: &str) -> bool;
}

/// A message that was shown through [`ScriptedDialogs`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogMessage {
    Alert(String),
    Confirm(String),
}

/// Dialogs with a preset answer that remember what they were asked.
#[derive(Debug, Default)]
pub struct ScriptedDialogs {
    answer: bool,
    messages: RefCell<Vec<DialogMessage>>,
}

impl ScriptedDialogs {
    /// Dialogs answering every `confirm` with `answer`
    #[must_use]
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            messages: RefCell::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<DialogMessage> {
        self.messages.borrow().clone()
    }
}

impl UserDialogs for ScriptedDialogs {
    fn alert(&self, message: &str) {
        self.messages
            .borrow_mut()
            .push(DialogMessage::Alert(message.to_string()));
    }

    fn confirm(&self, message: &str) -> bool {
        self.messages
            .borrow_mut()
            .push(DialogMessage::Confirm(message.to_string()));
        self.answer
    }
}
