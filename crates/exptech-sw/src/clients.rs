//! Registry of pages controlled by the worker.

use exptech_cache::GenerationId;
use hashbrown::HashMap;
use url::Url;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityState {
    Hidden,
    #[default]
    Visible,
}

/// A page (or worker context) the engine can control.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility: VisibilityState,

    /// Generation controlling this client, once claimed.
    pub controller: Option<GenerationId>,
}

impl Client {
    /// Create a window client.
    pub fn window(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            visibility: VisibilityState::Visible,
            controller: None,
        }
    }

    /// Whether some generation controls this client.
    pub fn is_controlled(&self) -> bool {
        self.controller.is_some()
    }
}

/// All known clients.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Take control of every client immediately, without waiting for a
    /// reload. Returns the IDs whose controller changed.
    pub fn claim(&mut self, generation: GenerationId) -> Vec<String> {
        let mut claimed = Vec::new();
        for client in self.clients.values_mut() {
            if client.controller.as_ref() != Some(&generation) {
                client.controller = Some(generation.clone());
                claimed.push(client.id.clone());
            }
        }
        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str) -> Client {
        Client::window(id, Url::parse("https://experience-tech.example/").unwrap())
    }

    #[test]
    fn test_add_get_remove() {
        let mut clients = Clients::new();
        clients.add(client("tab-1"));

        assert!(clients.get("tab-1").is_some());
        assert_eq!(clients.len(), 1);

        assert!(clients.remove("tab-1").is_some());
        assert!(clients.is_empty());
    }

    #[test]
    fn test_claim_controls_all_clients() {
        let mut clients = Clients::new();
        clients.add(client("tab-1"));
        clients.add(client("tab-2"));

        let generation = GenerationId::new("experience-tech", "1.0.1", 1);
        let mut claimed = clients.claim(generation.clone());
        claimed.sort();
        assert_eq!(claimed, vec!["tab-1".to_string(), "tab-2".to_string()]);
        assert!(clients.get("tab-1").unwrap().is_controlled());

        // A second claim by the same generation changes nothing.
        assert!(clients.claim(generation).is_empty());
    }

    #[test]
    fn test_claim_by_new_generation_replaces_controller() {
        let mut clients = Clients::new();
        clients.add(client("tab-1"));

        clients.claim(GenerationId::new("experience-tech", "1.0.1", 100));
        let claimed = clients.claim(GenerationId::new("experience-tech", "1.0.1", 200));
        assert_eq!(claimed, vec!["tab-1".to_string()]);
        assert_eq!(
            clients.get("tab-1").unwrap().controller.as_ref().map(|g| g.stamp()),
            Some(200)
        );
    }
}
