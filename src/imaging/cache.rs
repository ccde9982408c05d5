// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Memoisation of synthesized beams and sensitivities.
//!
//! These are expensive (each needs the deconvolution engine) and depend only
//! on the array configuration, the data selection and the weighting. Entries
//! are keyed by a structured fingerprint; if the weighting changes, everything
//! is thrown away. A clone is a fully independent copy, which is what workers
//! imaging targets in parallel get.

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use super::{Beam, Flux, Intent, Specmode};

/// Robustness values are only meaningful to a few decimal places; keying on
/// thousandths makes the key hashable.
fn robust_key(robust: f64) -> i64 {
    (robust * 1000.0).round() as i64
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub field: String,
    pub intent: Intent,
    /// Always sorted and deduplicated.
    pub spws: Vec<u32>,
    robust_milli: i64,
    pub uvtaper: Vec<String>,
    /// Sensitivities differ between continuum and cube images of the same
    /// data; beams are keyed without a specmode.
    #[serde(default)]
    pub specmode: Option<Specmode>,
}

impl CacheKey {
    pub fn new(field: &str, intent: Intent, spws: &[u32], robust: f64, uvtaper: &[String]) -> CacheKey {
        let mut spws = spws.to_vec();
        spws.sort_unstable();
        spws.dedup();
        CacheKey {
            field: field.to_string(),
            intent,
            spws,
            robust_milli: robust_key(robust),
            uvtaper: uvtaper.to_vec(),
            specmode: None,
        }
    }

    pub fn with_specmode(mut self, specmode: Specmode) -> CacheKey {
        self.specmode = Some(specmode);
        self
    }

    pub fn robust(&self) -> f64 {
        self.robust_milli as f64 / 1000.0
    }
}

/// JSON objects need string keys, so the entries are persisted as a list.
mod entries_as_list {
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::CacheKey;

    pub(super) fn serialize<S, T>(map: &IndexMap<CacheKey, T>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        s.collect_seq(map.iter())
    }

    pub(super) fn deserialize<'de, D, T>(d: D) -> Result<IndexMap<CacheKey, T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        let list: Vec<(CacheKey, T)> = Vec::deserialize(d)?;
        Ok(list.into_iter().collect())
    }
}

/// A get/put cache with weighting-driven invalidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize",
    deserialize = "T: Deserialize<'de>"
))]
pub struct KeyedCache<T> {
    /// The weighting (robust in thousandths, uvtaper) that all entries were
    /// made with.
    weighting: Option<(i64, Vec<String>)>,

    #[serde(with = "entries_as_list")]
    entries: IndexMap<CacheKey, T>,
}

impl<T> Default for KeyedCache<T> {
    fn default() -> Self {
        KeyedCache {
            weighting: None,
            entries: IndexMap::new(),
        }
    }
}

impl<T: Clone> KeyedCache<T> {
    pub fn get(&self, key: &CacheKey) -> Option<T> {
        self.entries.get(key).cloned()
    }

    pub fn put(&mut self, key: CacheKey, value: T) {
        self.entries.insert(key, value);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop all entries if they were made with a different weighting. Returns
    /// true if anything was invalidated.
    pub fn ensure_weighting(&mut self, robust: f64, uvtaper: &[String]) -> bool {
        let new = (robust_key(robust), uvtaper.to_vec());
        let invalidated = match &self.weighting {
            Some(old) if *old != new => {
                debug!(
                    "Weighting changed (robust {} -> {robust}, uvtaper {:?} -> {uvtaper:?}); dropping {} cached entries",
                    old.0 as f64 / 1000.0,
                    old.1,
                    self.entries.len()
                );
                self.entries.clear();
                true
            }
            _ => false,
        };
        self.weighting = Some(new);
        invalidated
    }

    /// Take the entries of another cache that this one doesn't have. Nothing
    /// is taken if the other cache was made with a different weighting.
    pub fn absorb(&mut self, other: KeyedCache<T>) -> usize {
        if self.weighting.is_some() && other.weighting.is_some() && self.weighting != other.weighting {
            return 0;
        }
        if self.weighting.is_none() {
            self.weighting = other.weighting;
        }
        let mut taken = 0;
        for (key, value) in other.entries {
            if !self.entries.contains_key(&key) {
                self.entries.insert(key, value);
                taken += 1;
            }
        }
        taken
    }
}

pub type BeamCache = KeyedCache<Beam>;
pub type SensitivityCache = KeyedCache<Flux>;

/// Both caches, as carried between imaging targets and pipeline stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagingCaches {
    #[serde(default)]
    pub beams: BeamCache,

    #[serde(default)]
    pub sensitivities: SensitivityCache,
}

impl ImagingCaches {
    pub fn ensure_weighting(&mut self, robust: f64, uvtaper: &[String]) {
        self.beams.ensure_weighting(robust, uvtaper);
        self.sensitivities.ensure_weighting(robust, uvtaper);
    }

    /// Fold in what a worker learned while imaging with its own copy.
    pub fn absorb(&mut self, other: ImagingCaches) {
        let beams = self.beams.absorb(other.beams);
        let sensitivities = self.sensitivities.absorb(other.sensitivities);
        if beams + sensitivities > 0 {
            debug!("Took {beams} beams and {sensitivities} sensitivities from a worker's caches");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beam() -> Beam {
        Beam {
            major: 1.2,
            minor: 0.9,
            pa: 45.0,
        }
    }

    #[test]
    fn test_key_sorts_spws() {
        let a = CacheKey::new("M100", Intent::Target, &[21, 17, 19, 17], 0.5, &[]);
        let b = CacheKey::new("M100", Intent::Target, &[17, 19, 21], 0.5, &[]);
        assert_eq!(a, b);
        assert_eq!(a.spws, vec![17, 19, 21]);
        assert_eq!(a.robust(), 0.5);

        let c = CacheKey::new("M100", Intent::Target, &[17, 19, 21], 1.0, &[]);
        assert_ne!(a, c);

        let cube = b.clone().with_specmode(Specmode::Cube);
        assert_ne!(b, cube);
    }

    #[test]
    fn test_get_put() {
        let mut cache = BeamCache::default();
        let key = CacheKey::new("M100", Intent::Target, &[17], 0.5, &[]);
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), beam());
        assert_eq!(cache.get(&key), Some(beam()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_weighting_change_invalidates() {
        let mut caches = ImagingCaches::default();
        caches.ensure_weighting(0.5, &[]);
        let key = CacheKey::new("M100", Intent::Target, &[17], 0.5, &[]);
        caches.beams.put(key.clone(), beam());
        caches.sensitivities.put(key.clone(), Flux::from_jy(1e-3));

        // Same weighting: nothing happens.
        caches.ensure_weighting(0.5, &[]);
        assert_eq!(caches.beams.len(), 1);

        caches.ensure_weighting(0.5, &["3arcsec".to_string()]);
        assert!(caches.beams.is_empty());
        assert!(caches.sensitivities.is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut caches = ImagingCaches::default();
        let key = CacheKey::new("M100", Intent::Target, &[17], 0.5, &[]);
        let mut worker_copy = caches.clone();
        worker_copy.beams.put(key.clone(), beam());
        assert!(caches.beams.get(&key).is_none());
        caches.beams.put(key.clone(), beam());
        worker_copy.beams.clear();
        assert!(caches.beams.contains(&key));
    }

    #[test]
    fn test_absorb() {
        let mut caches = ImagingCaches::default();
        caches.ensure_weighting(0.5, &[]);
        let k17 = CacheKey::new("M100", Intent::Target, &[17], 0.5, &[]);
        let k19 = CacheKey::new("M100", Intent::Target, &[19], 0.5, &[]);
        caches.beams.put(k17.clone(), beam());

        let mut worker = caches.clone();
        worker.beams.put(k19.clone(), beam());
        worker.sensitivities.put(k19.clone(), Flux::from_jy(2e-3));
        caches.absorb(worker);
        assert_eq!(caches.beams.len(), 2);
        assert_eq!(caches.sensitivities.get(&k19), Some(Flux::from_jy(2e-3)));

        // Entries made with another weighting are ignored.
        let mut other = ImagingCaches::default();
        other.ensure_weighting(2.0, &[]);
        other
            .beams
            .put(CacheKey::new("M100", Intent::Target, &[21], 2.0, &[]), beam());
        caches.absorb(other);
        assert_eq!(caches.beams.len(), 2);
    }

    #[test]
    fn test_persisted_as_json() {
        let mut caches = ImagingCaches::default();
        caches.ensure_weighting(0.5, &[]);
        caches.beams.put(
            CacheKey::new("M100", Intent::Target, &[17, 19], 0.5, &[]),
            beam(),
        );
        let json = serde_json::to_string(&caches).unwrap();
        let back: ImagingCaches = serde_json::from_str(&json).unwrap();
        assert_eq!(caches, back);
    }
}
