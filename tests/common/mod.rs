// Shared fixtures for the integration tests: an in-memory "image server"
// that records every load and cleanup it is asked to do.
#![allow(dead_code)]

use parking_lot::Mutex;
use simple_cache::DataSource;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("image server: {0}")]
pub struct ServerError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub pixels: Vec<u8>,
    pub generation: u32,
    pub cleaned: bool,
}

/// Calls observed across every clone of an `ImageServer`.
#[derive(Debug, Default)]
pub struct Journal {
    pub loads: Vec<String>,
    pub cleanups: Vec<String>,
}

#[derive(Clone, Default)]
pub struct ImageServer {
    pub journal: Arc<Mutex<Journal>>,
    pub sizes: HashMap<String, u64>,
    pub failing_loads: HashSet<String>,
    pub failing_cleanups: HashSet<String>,
    pub delays: HashMap<String, Duration>,
}

impl ImageServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, id: &str, bytes: u64) -> Self {
        self.sizes.insert(id.to_string(), bytes);
        self
    }

    pub fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub fn loads(&self) -> Vec<String> {
        self.journal.lock().loads.clone()
    }

    pub fn loads_of(&self, id: &str) -> usize {
        self.journal.lock().loads.iter().filter(|l| *l == id).count()
    }

    pub fn cleanups(&self) -> Vec<String> {
        self.journal.lock().cleanups.clone()
    }
}

impl DataSource for ImageServer {
    type Id = str;
    type Key = String;
    type Payload = Image;
    type Error = ServerError;

    fn key_of(&self, id: &str) -> String {
        id.to_string()
    }

    fn load(&mut self, id: &str) -> Result<Image, ServerError> {
        let generation = {
            let mut journal = self.journal.lock();
            journal.loads.push(id.to_string());
            journal.loads.iter().filter(|l| *l == id).count() as u32
        };
        if let Some(delay) = self.delays.get(id) {
            std::thread::sleep(*delay);
        }
        if self.failing_loads.contains(id) {
            return Err(ServerError(format!("{id} unavailable")));
        }
        let bytes = self.sizes.get(id).copied().unwrap_or(1);
        Ok(Image {
            id: id.to_string(),
            pixels: vec![0; bytes as usize],
            generation,
            cleaned: false,
        })
    }

    fn cleanup(&mut self, image: &mut Image) -> Result<(), ServerError> {
        self.journal.lock().cleanups.push(image.id.clone());
        if self.failing_cleanups.contains(&image.id) {
            return Err(ServerError(format!("{} would not release", image.id)));
        }
        image.cleaned = true;
        Ok(())
    }

    fn size_in_memory(&self, image: &Image) -> u64 {
        image.pixels.len() as u64
    }
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
