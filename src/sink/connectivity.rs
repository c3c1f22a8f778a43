use tokio::sync::watch;

/// Online/offline signal shared between the platform layer and the sink
#[derive(Debug)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        ConnectivityMonitor { sender }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Update the state; returns true on an offline -> online transition
    pub fn set(&self, online: bool) -> bool {
        let mut came_online = false;
        self.sender.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            came_online = online;
            *current = online;
            true
        });
        if came_online {
            log::info!("Connectivity restored");
        } else if !online {
            log::debug!("Connectivity lost");
        }
        came_online
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(monitor.is_online());
        assert!(!monitor.set(true));
        assert!(!monitor.set(false));
        assert!(!monitor.is_online());
        assert!(!monitor.set(false));
        assert!(monitor.set(true));
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        // Same value does not notify
        monitor.set(true);
        assert!(!rx.has_changed().unwrap());
    }
}
