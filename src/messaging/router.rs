//! # Queue Router
//!
//! Maps routing keys onto configured engine bindings and their input queues.
//! Patterns follow AMQP topic rules: words are separated by `.`, `*` matches
//! exactly one word and `#` matches zero or more words.

use crate::config::EngineBinding;

#[derive(Debug, Clone, Default)]
pub struct QueueRouter {
    bindings: Vec<EngineBinding>,
    output_queue: Option<String>,
}

impl QueueRouter {
    pub fn new(bindings: Vec<EngineBinding>, output_queue: Option<String>) -> Self {
        Self {
            bindings,
            output_queue,
        }
    }

    pub fn bindings(&self) -> &[EngineBinding] {
        &self.bindings
    }

    /// Binding consuming `routing_key` from `input_queue`, first match wins
    pub fn binding_for(&self, input_queue: &str, routing_key: &str) -> Option<&EngineBinding> {
        self.bindings
            .iter()
            .find(|b| b.input_queue == input_queue && topic_matches(&b.routing_key, routing_key))
    }

    /// Queues an outbound message with this routing key is published to
    pub fn destinations(&self, routing_key: &str) -> Vec<String> {
        let mut queues: Vec<String> = Vec::new();
        for binding in &self.bindings {
            if topic_matches(&binding.routing_key, routing_key) && !queues.contains(&binding.input_queue) {
                queues.push(binding.input_queue.clone());
            }
        }
        if let Some(output) = &self.output_queue {
            if !queues.contains(output) {
                queues.push(output.clone());
            }
        }
        queues
    }
}

pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) => (word == "*" || word == head) && match_words(rest, tail),
            None => false,
        },
    }
}
