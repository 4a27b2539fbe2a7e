//! Writes a small synthetic TrackMate export (`sample_data/demo_00{1,2}.csv`)
//! with divisions, spurious size jumps and short tracks.

use std::f64::consts::PI;
use std::path::Path;

use anyhow::{Context, Result};

const FRAMES: i64 = 96;
const INTERVAL_MINUTES: f64 = 30.0;
const TRACKS_PER_SUBSET: i64 = 12;

const HEADER: [&str; 8] = [
    "LABEL",
    "ID",
    "TRACK_ID",
    "QUALITY",
    "FRAME",
    "AREA",
    "MEAN_INTENSITY_CH1",
    "MEAN_INTENSITY_CH2",
];
const DESCRIPTIONS: [[&str; 8]; 3] = [
    ["Label", "Spot ID", "Track ID", "Quality", "Frame", "Area", "Mean intensity ch1", "Mean intensity ch2"],
    ["Label", "Spot ID", "Track ID", "Quality", "Frame", "Area", "Mean ch1", "Mean ch2"],
    ["", "", "", "(quality)", "", "(micron^2)", "(counts)", "(counts)"],
];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: i64, hi: i64) -> i64 {
        lo + (self.next_f64() * (hi - lo) as f64) as i64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        mean + std_dev * z
    }
}

/// One synthetic cell: a nuclear marker that spikes and halves at each
/// division, an area that halves, and a circadian-like reporter.
struct Track {
    id: i64,
    first: i64,
    last: i64,
    divisions: Vec<i64>,
    /// Frame with an artificial segmentation error in AREA.
    glitch: Option<i64>,
    phase: f64,
}

impl Track {
    fn random(id: i64, rng: &mut SimpleRng) -> Self {
        let short = rng.next_f64() < 0.15;
        let first = if short { rng.range(0, 60) } else { rng.range(0, 6) };
        let last = if short {
            (first + rng.range(5, 15)).min(FRAMES - 1)
        } else {
            FRAMES - 1 - rng.range(0, 6)
        };
        let mut divisions = Vec::new();
        let mut next = first + rng.range(8, 30);
        while next < last - 4 {
            divisions.push(next);
            next += rng.range(40, 52);
        }
        let glitch = (rng.next_f64() < 0.25).then(|| rng.range(first + 2, last.max(first + 3)));
        Self {
            id,
            first,
            last,
            divisions,
            glitch,
            phase: rng.next_f64() * 2.0 * PI,
        }
    }

    /// Frames since the last division (or since the start of the track).
    fn age(&self, frame: i64) -> i64 {
        let born = self
            .divisions
            .iter()
            .copied()
            .filter(|&d| d < frame)
            .last()
            .map_or(self.first, |d| d + 1);
        frame - born
    }

    fn sample(&self, frame: i64, rng: &mut SimpleRng) -> (f64, f64, f64) {
        let growth = 1.0 + self.age(frame) as f64 / 48.0;
        let mut area = 80.0 * growth * rng.gauss(1.0, 0.02);
        let mut marker = 100.0 * growth.sqrt() * rng.gauss(1.0, 0.03);
        if self.divisions.contains(&frame) {
            marker *= 2.5;
        }
        if self.glitch == Some(frame) {
            area *= 1.8;
        }
        if area < 1.0 {
            area = 1.0;
        }
        let hours = frame as f64 * INTERVAL_MINUTES / 60.0;
        let reporter = 50.0 + 30.0 * (2.0 * PI * hours / 24.0 + self.phase).sin() + rng.gauss(0.0, 2.0);
        (area, marker, reporter.max(0.0))
    }
}

fn write_subset(path: &Path, seed: u64) -> Result<usize> {
    let mut rng = SimpleRng::new(seed);
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(HEADER)?;
    for row in DESCRIPTIONS {
        writer.write_record(row)?;
    }

    let mut spot_id = 0usize;
    for id in 0..TRACKS_PER_SUBSET {
        let track = Track::random(id, &mut rng);
        for frame in track.first..=track.last {
            let (area, marker, reporter) = track.sample(frame, &mut rng);
            writer.write_record([
                format!("ID{spot_id}"),
                spot_id.to_string(),
                track.id.to_string(),
                format!("{:.3}", rng.gauss(20.0, 1.0)),
                frame.to_string(),
                format!("{area:.3}"),
                format!("{marker:.3}"),
                format!("{reporter:.3}"),
            ])?;
            spot_id += 1;
        }
        // Untracked spots carry an empty TRACK_ID and are dropped by the loader.
        writer.write_record([
            format!("ID{spot_id}"),
            spot_id.to_string(),
            String::new(),
            "1.0".to_string(),
            "0".to_string(),
            "10.0".to_string(),
            "5.0".to_string(),
            "5.0".to_string(),
        ])?;
        spot_id += 1;
    }
    writer.flush().context("flushing CSV")?;
    Ok(spot_id)
}

fn main() -> Result<()> {
    let folder = Path::new("sample_data");
    std::fs::create_dir_all(folder).with_context(|| format!("creating {}", folder.display()))?;

    for (subset, seed) in [("001", 42), ("002", 7)] {
        let path = folder.join(format!("demo_{subset}.csv"));
        let spots = write_subset(&path, seed)?;
        println!("Wrote {spots} spots to {}", path.display());
    }
    println!(
        "Run: trackmate-post {} --interval {INTERVAL_MINUTES} --channels H2B,Reporter",
        folder.display()
    );
    Ok(())
}
