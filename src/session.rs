use crate::config::Config;
use crate::error::{Result, TrailError};
use crate::location::{request_current_position, LocationProvider, LOCATION_MAX_AGE, LOCATION_TIMEOUT};
use crate::matching::{reconcile, ResolvedRow};
use crate::store::LocalStore;
use crate::sync::{
    contribute_url, contribution_chunk, guess_timestamp, import_contributions, url_params, SharedLogClient,
};
use crate::track::{cumulative_gain, ReferenceTrack};
use crate::types::Fix;
use reqwest::Url;

/// Reference track of the current track id, with its gain curve
struct LoadedTrack {
    track_id: String,
    track: ReferenceTrack,
    gain: Vec<f64>,
}

/// Rows computed at some revision
struct Derived {
    revision: u64,
    rows: Vec<ResolvedRow>,
}

/// State of one participant following one session key
///
/// Every change to the key, start time, track or fixes bumps `revision`;
/// [`rows`](Session::rows) recomputes only when the revision moved.
pub struct Session {
    config: Config,
    key: String,
    start_time: i64,
    store: LocalStore,
    client: SharedLogClient,
    track: Option<LoadedTrack>,
    revision: u64,
    derived: Option<Derived>,
    computations: u64,
}

impl Session {
    /// Resume from persisted state; the client's pending queue should have
    /// been seeded from `store.pending`
    pub fn new(config: Config, store: LocalStore, client: SharedLogClient) -> Self {
        let key = store.last_key.clone().unwrap_or_default();
        let start_time = store.last_start_time.unwrap_or(0);
        Session {
            config,
            key,
            start_time,
            store,
            client,
            track: None,
            revision: 0,
            derived: None,
            computations: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Track part of the key: `25eb@bob` follows track `25eb`
    pub fn track_id(&self) -> &str {
        self.key.split('@').next().unwrap_or("")
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &SharedLogClient {
        &self.client
    }

    pub fn fixes(&self) -> &[Fix] {
        self.store.fixes(&self.key).map(|f| f.as_slice()).unwrap_or(&[])
    }

    /// Persistable state, pending queue included
    pub fn to_store(&self) -> LocalStore {
        let mut store = self.store.clone();
        store.pending = self.client.pending().snapshot();
        store
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    pub fn set_key(&mut self, key: &str) {
        if key == self.key {
            return;
        }
        self.key = key.to_string();
        if self
            .track
            .as_ref()
            .map_or(false, |t| t.track_id != self.track_id())
        {
            log::info!("Track changed to {}, dropping loaded trace", self.track_id());
            self.track = None;
        }
        if !key.is_empty() {
            self.store.touch_key(key);
        }
        self.bump();
    }

    pub fn set_start_time(&mut self, start_time: i64) {
        if start_time == self.start_time {
            return;
        }
        self.start_time = start_time;
        if start_time != 0 {
            self.store.last_start_time = Some(start_time);
        }
        self.bump();
    }

    /// Use `track` as the reference trace of the current track id
    pub fn set_track(&mut self, track: ReferenceTrack) {
        let gain = cumulative_gain(&track);
        self.track = Some(LoadedTrack {
            track_id: self.track_id().to_string(),
            track,
            gain,
        });
        self.bump();
    }

    pub fn track(&self) -> Option<&ReferenceTrack> {
        self.track.as_ref().map(|t| &t.track)
    }

    /// Read `<track_dir>/<track id>.gpx` unless already loaded
    pub fn load_track(&mut self) -> Result<()> {
        if self.key.is_empty() || self.track.is_some() {
            return Ok(());
        }
        let path = self.config.track_path(self.track_id());
        let text = std::fs::read_to_string(&path)
            .map_err(|e| TrailError::Storage(format!("{}: {}", path.display(), e)))?;
        let track = ReferenceTrack::parse(&text)?;
        log::info!("Loaded {} ({} points)", path.display(), track.len());
        self.set_track(track);
        Ok(())
    }

    /// Record a fix for the current key; false if its timestamp is known
    pub fn add_fix(&mut self, fix: Fix) -> bool {
        let added = self.store.fixes_mut(&self.key).insert(fix);
        if added {
            self.bump();
        }
        added
    }

    /// Resolved rows, newest first; empty until a track is loaded
    pub fn rows(&mut self) -> Result<&[ResolvedRow]> {
        let Some(loaded) = self.track.as_ref() else {
            return Ok(&[]);
        };

        let stale = self
            .derived
            .as_ref()
            .map_or(true, |d| d.revision != self.revision);
        if stale {
            let fixes = self.store.fixes(&self.key).map(|f| f.as_slice()).unwrap_or(&[]);
            let rows = reconcile(
                &loaded.track,
                &loaded.gain,
                fixes,
                &self.config.matching,
                self.start_time,
                self.config.preferences.speed_bounds(),
            )?;
            self.computations += 1;
            self.derived = Some(Derived {
                revision: self.revision,
                rows,
            });
        }

        Ok(self.derived.as_ref().map(|d| d.rows.as_slice()).unwrap_or(&[]))
    }

    /// Ask the device for a position, keep it, and publish it when sharing
    ///
    /// Returns the stored fix, or `None` when no position could be obtained.
    pub async fn contribute_device_location(&mut self, provider: &dyn LocationProvider) -> Option<Fix> {
        let position = match request_current_position(provider, LOCATION_TIMEOUT, LOCATION_MAX_AGE).await {
            Ok(position) => position,
            Err(e) => {
                self.client.diagnostics().error(&e.to_string());
                return None;
            }
        };

        let fix = Fix::rounded(position.timestamp, position.lat, position.lon);
        self.add_fix(fix);
        if !self.config.preferences.share_new_points {
            return Some(fix);
        }

        let tsec = fix.timestamp / 1000;
        let url = contribute_url(&self.config.sync.base_url, &self.key, position.lat, position.lon, tsec);
        self.client.diagnostics().pending(&url);
        let chunk = contribution_chunk(fix.timestamp, &url);

        if let Some(content) = self.client.append_or_enqueue(&self.key, &chunk).await {
            self.client.diagnostics().done(&url);
            if self.config.preferences.import_shared_points {
                self.load_shared_points(Some(content)).await;
            }
        }
        Some(fix)
    }

    /// Flush the pending queue, then import the resulting log when enabled
    pub async fn send_pending(&mut self) {
        let content = self.client.send_pending(&self.key).await;
        if let Some(content) = content {
            if self.config.preferences.import_shared_points {
                self.load_shared_points(Some(content)).await;
            }
        }
    }

    /// Merge contributions for the current key found in `content`, fetching
    /// the shared log when none is given. Returns how many fixes were new.
    pub async fn load_shared_points(&mut self, content: Option<String>) -> usize {
        let content = match content.filter(|c| !c.is_empty()) {
            Some(content) => content,
            None => match self.client.fetch_latest(&self.key).await {
                Some(content) => content,
                None => return 0,
            },
        };

        let import = import_contributions(
            &content,
            &self.key,
            &self.config.sync.allowed_origins(),
            self.config.preferences.import_shared_start,
        );
        if import.rejected > 0 {
            log::warn!("Ignored {} malformed shared contributions", import.rejected);
        }
        if let Some(start) = import.start_time {
            self.set_start_time(start);
        }

        let added = self.store.fixes_mut(&self.key).extend(import.fixes);
        if added > 0 {
            log::info!("Imported {} shared fixes for {}", added, self.key);
            self.bump();
        }
        added
    }

    /// Apply a link: switch key and start time, publish the contribution it
    /// carries when sharing, then import when enabled
    pub async fn digest_link(&mut self, link: &str) -> Result<()> {
        let url = Url::parse(link).map_err(|e| TrailError::validation(format!("bad link: {}", e)))?;
        let params = url_params(&url);

        if let Some(key) = params.get("lskey") {
            self.set_key(key);
        }
        if let Some(start) = params.get("start") {
            self.set_start_time(guess_timestamp(start)?);
        }

        let carries_fix = ["lat", "lon", "at"].iter().all(|k| params.contains_key(*k));
        let sharing = carries_fix && self.config.preferences.share_new_points;
        let importing = self.config.preferences.import_shared_points;

        let content = if sharing {
            let timestamp = guess_timestamp(&params["at"])?;
            let mut link = url.clone();
            link.set_fragment(None);
            let chunk = contribution_chunk(timestamp, link.as_str());
            self.client.append_or_enqueue(&self.key, &chunk).await
        } else if importing {
            self.client.fetch_latest(&self.key).await
        } else {
            None
        };

        if importing {
            if let Some(content) = content.filter(|c| !c.is_empty()) {
                self.load_shared_points(Some(content)).await;
            }
        }
        Ok(())
    }
}
