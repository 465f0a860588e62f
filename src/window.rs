// src/window.rs
//! Przesuwne okna (bounded FIFO) per klucz – wspólne dla wiadomości i dołączeń.

use std::collections::VecDeque;
use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Element okna z tożsamością (edycja = ten sam `id`).
pub trait WindowItem {
    type Id: PartialEq + Clone;
    fn id(&self) -> Self::Id;
}

#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    capacity: usize,
    items: VecDeque<T>,
    touched: Instant,
}

impl<T: WindowItem> SlidingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
            touched: Instant::now(),
        }
    }

    /// Ten sam `id` → stary wpis wylatuje, nowy ląduje na końcu.
    /// Pełne okno → najstarszy wpis wylatuje.
    pub fn push(&mut self, item: T) {
        let id = item.id();
        self.items.retain(|it| it.id() != id);
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
        self.touched = Instant::now();
    }

    /// Zmiana pojemności czyści okno.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity != self.capacity {
            self.capacity = capacity;
            self.items.clear();
        }
    }

    pub fn remove(&mut self, id: &T::Id) -> bool {
        let before = self.items.len();
        self.items.retain(|it| it.id() != *id);
        before != self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    fn idle_for(&self) -> Duration {
        self.touched.elapsed()
    }
}

/// Kiedy okno jest oddawane do oceny po `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalPolicy {
    /// Okna wiadomości: pojedynczą wiadomość ocenia detektor jednowiadomościowy.
    MoreThanOne,
    /// Antiraid: tylko pełne okno.
    AtCapacity,
}

impl EvalPolicy {
    fn ready<T: WindowItem>(self, w: &SlidingWindow<T>) -> bool {
        match self {
            EvalPolicy::MoreThanOne => w.len() > 1,
            EvalPolicy::AtCapacity => w.is_full(),
        }
    }
}

/// Leniwie tworzone okna per klucz.
pub struct WindowStore<K, T> {
    windows: DashMap<K, SlidingWindow<T>>,
    capacity: usize,
    policy: EvalPolicy,
}

impl<K, T> WindowStore<K, T>
where
    K: Eq + Hash + Clone,
    T: WindowItem + Clone,
{
    pub fn new(capacity: usize, policy: EvalPolicy) -> Self {
        Self {
            windows: DashMap::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Dokłada element; zwraca migawkę okna (od najstarszego), jeśli nadaje się do oceny.
    pub fn push(&self, key: K, item: T) -> Option<Vec<T>> {
        self.push_with_capacity(key, item, self.capacity)
    }

    /// Jak [`push`](Self::push), ale z pojemnością per wywołanie (np. limit z konfiguracji gildii).
    pub fn push_with_capacity(&self, key: K, item: T, capacity: usize) -> Option<Vec<T>> {
        let mut w = self
            .windows
            .entry(key)
            .or_insert_with(|| SlidingWindow::new(capacity));
        w.resize(capacity);
        w.push(item);

        self.policy
            .ready(&*w)
            .then(|| w.iter().cloned().collect())
    }

    /// Push, ocena i czyszczenie pod jednym dostępem do wpisu. Gotowa migawka, dla której
    /// `take` zwraca `true`, wychodzi z okna; okno zostaje puste.
    pub fn push_and_take(
        &self,
        key: K,
        item: T,
        capacity: usize,
        take: impl FnOnce(&[T]) -> bool,
    ) -> Option<Vec<T>> {
        let mut w = self
            .windows
            .entry(key)
            .or_insert_with(|| SlidingWindow::new(capacity));
        w.resize(capacity);
        w.push(item);
        if !self.policy.ready(&*w) {
            return None;
        }

        let snapshot: Vec<T> = w.iter().cloned().collect();
        if !take(&snapshot) {
            return None;
        }
        w.clear();
        Some(snapshot)
    }

    pub fn len(&self, key: &K) -> usize {
        self.windows.get(key).map(|w| w.len()).unwrap_or(0)
    }

    pub fn clear(&self, key: &K) {
        if let Some(mut w) = self.windows.get_mut(key) {
            w.clear();
        }
    }

    /// Usuwa wskazane elementy (np. skasowane wiadomości). Zwraca liczbę usuniętych.
    pub fn remove_ids(&self, key: &K, ids: &[T::Id]) -> usize {
        let Some(mut w) = self.windows.get_mut(key) else {
            return 0;
        };
        ids.iter().filter(|id| w.remove(id)).count()
    }

    /// Usuwa element o danym `id` z okien wszystkich kluczy spełniających `pred`.
    pub fn remove_id_where(&self, id: &T::Id, pred: impl Fn(&K) -> bool) -> usize {
        self.windows
            .iter_mut()
            .filter(|e| pred(e.key()))
            .filter_map(|mut e| e.value_mut().remove(id).then_some(()))
            .count()
    }

    /// Wywala okna puste albo nieruszane dłużej niż `idle`. Zwraca liczbę usuniętych.
    pub fn prune_idle(&self, idle: Duration) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| !w.is_empty() && w.idle_for() < idle);
        before.saturating_sub(self.windows.len())
    }

    pub fn keys_count(&self) -> usize {
        self.windows.len()
    }
}
