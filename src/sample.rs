//! Deterministic synthetic dataset with the shape of the published
//! experiment: 2 rounds × 5 temperatures × 2 species × 6 time points, plus
//! 2 infection statuses in round 2. 960 trial rows (600 experimental + 360
//! control), of which the exclusion rules remove exactly 60 experimental
//! and 10 control rows.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::data::loader::{RawCrayfishRow, RawTrialRow};
use crate::error::{PipelineError, Result};
use crate::export::write_csv;

pub const TEMPS: [f64; 5] = [15.0, 18.0, 21.0, 24.0, 27.0];
pub const TIMES: [u32; 6] = [12, 24, 36, 48, 60, 72];
pub const SNAIL_DENSITY: u32 = 12;

const ROUND1_CRAYFISH_PER_CELL: usize = 4;
const ROUND1_CONTROLS_PER_CELL: usize = 4;
const ROUND2_CRAYFISH_PER_CELL: usize = 3;
const ROUND2_CONTROLS_PER_CELL: usize = 1;

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

    /// Uniform in `0..=max`.
    fn up_to(&mut self, max: u32) -> u32 {
        ((self.next_f64() * f64::from(max + 1)) as u32).min(max)
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Both source sheets of a generated dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    pub crayfish: Vec<RawCrayfishRow>,
    pub trials: Vec<RawTrialRow>,
}

/// One experimental unit: a tank with a crayfish, or a control tank.
struct Tank {
    round: u8,
    temp_idx: usize,
    species_code: &'static str,
    infection: Option<&'static str>,
    replicate: usize,
    control: bool,
}

impl Tank {
    fn week(&self, pilot_week: &str) -> String {
        // One week per temperature per round; the first replicate of the
        // round 1 Physa tanks ran as the pilot.
        if self.round == 1 && !self.control && self.species_code == "P" && self.replicate == 0 {
            pilot_week.to_string()
        } else {
            (usize::from(self.round - 1) * TEMPS.len() + self.temp_idx + 1).to_string()
        }
    }

    fn condition(&self) -> String {
        match (self.control, self.infection) {
            (true, None) => "control".to_string(),
            (true, Some(_)) => "snail_control".to_string(),
            (false, None) => "crayfish".to_string(),
            (false, Some(inf)) => format!("crayfish_{inf}"),
        }
    }

    fn dodgey_tank(&self) -> bool {
        let r2_uninfected_h = self.round == 2
            && !self.control
            && self.species_code == "H"
            && self.infection == Some("uninfected")
            && self.replicate == 0
            && self.temp_idx < 3;
        let r1_control = self.round == 1
            && self.control
            && self.temp_idx == 0
            && self.species_code == "P"
            && self.replicate == 0;
        r2_uninfected_h || r1_control
    }

    fn dodgey_row(&self, time: u32) -> bool {
        self.round == 2
            && self.control
            && self.species_code == "H"
            && self.infection == Some("infected")
            && (1..=4).contains(&self.temp_idx)
            && time == 36
    }

    fn molted_at(&self, time: u32) -> bool {
        self.round == 2
            && !self.control
            && self.species_code == "P"
            && self.infection == Some("infected")
            && self.replicate == 1
            && (time == 48 || time == 60)
    }

    /// Mis-recorded sheet lines where more snails remain than possible.
    fn miscounted_at(&self, time: u32) -> bool {
        self.round == 1
            && !self.control
            && self.species_code == "H"
            && self.replicate == 1
            && self.temp_idx < 2
            && time == 72
    }

    /// Every snail in this tank died before the last observation.
    fn all_dead_at(&self, time: u32) -> bool {
        self.round == 1
            && self.control
            && self.species_code == "H"
            && self.temp_idx == 4
            && self.replicate == 3
            && time == 72
    }
}

fn tanks() -> Vec<Tank> {
    let mut tanks = Vec::new();
    for round in [1u8, 2] {
        for temp_idx in 0..TEMPS.len() {
            for species_code in ["P", "H"] {
                let infections: &[Option<&'static str>] = if round == 1 {
                    &[None]
                } else {
                    &[Some("infected"), Some("uninfected")]
                };
                for &infection in infections {
                    let (n_crayfish, n_controls) = if round == 1 {
                        (ROUND1_CRAYFISH_PER_CELL, ROUND1_CONTROLS_PER_CELL)
                    } else {
                        (ROUND2_CRAYFISH_PER_CELL, ROUND2_CONTROLS_PER_CELL)
                    };
                    for (control, n) in [(false, n_crayfish), (true, n_controls)] {
                        for replicate in 0..n {
                            tanks.push(Tank {
                                round,
                                temp_idx,
                                species_code,
                                infection,
                                replicate,
                                control,
                            });
                        }
                    }
                }
            }
        }
    }
    tanks
}

/// Generate the dataset. The same `seed` always gives the same rows.
pub fn generate(seed: u64, config: &PipelineConfig) -> SampleData {
    let mut rng = SimpleRng::new(seed);
    let mut crayfish = Vec::new();
    let mut trials = Vec::new();
    let (mut n_crayfish, mut n_controls) = (0usize, 0usize);
    let collectors = ["AB", "JM", "KL"];

    for tank in tanks() {
        let week = tank.week(&config.pilot_week);
        let crayfish_id = if tank.control {
            n_controls += 1;
            format!("CTL{n_controls:03}")
        } else {
            n_crayfish += 1;
            format!("CF{n_crayfish:03}")
        };

        if !tank.control {
            let weight = rng.gauss(7.5, 1.5).max(2.0);
            crayfish.push(RawCrayfishRow {
                week: week.clone(),
                crayfish_id: crayfish_id.clone(),
                weight: Some(format!("{:.1}", weight)),
                berried: Some(if rng.up_to(9) == 0 { "Y" } else { "N" }.to_string()),
            });
        }

        let mut eaten_so_far = 0u32;
        let mut dead_so_far = 0u32;
        for (i, &time) in TIMES.iter().enumerate() {
            if !tank.control && i > 0 {
                eaten_so_far += rng.up_to(2).min(SNAIL_DENSITY - eaten_so_far - dead_so_far);
            }
            if rng.up_to(19) == 0 {
                dead_so_far += 1u32.min(SNAIL_DENSITY - eaten_so_far - dead_so_far);
            }
            let (dead, mut remaining) = if tank.all_dead_at(time) {
                (SNAIL_DENSITY, 0)
            } else {
                (dead_so_far, SNAIL_DENSITY - eaten_so_far - dead_so_far)
            };
            if tank.miscounted_at(time) {
                remaining = SNAIL_DENSITY - dead + 1;
            }

            let (snails_out, snails_under_shelter) = if tank.round == 2 {
                let visible = remaining.min(SNAIL_DENSITY);
                let out = rng.up_to(visible);
                let shelter = rng.up_to(visible - out);
                (Some(out.to_string()), Some(shelter.to_string()))
            } else {
                (None, None)
            };

            let dodgey = tank.dodgey_tank() || tank.dodgey_row(time);
            trials.push(RawTrialRow {
                week: week.clone(),
                crayfish_id: crayfish_id.clone(),
                time: Some(time.to_string()),
                snail_density: Some(SNAIL_DENSITY.to_string()),
                snails_remaining: Some(remaining.to_string()),
                dead_snails: Some(dead.to_string()),
                snails_out,
                snails_under_shelter,
                snail_species: Some(tank.species_code.to_string()),
                infection_status: Some(tank.infection.unwrap_or("NA").to_string()),
                temp: Some(TEMPS[tank.temp_idx].to_string()),
                condition: Some(tank.condition()),
                dodgey_remove: Some(if dodgey { "Y" } else { "N" }.to_string()),
                molt: Some(if tank.molted_at(time) { "Y" } else { "N" }.to_string()),
                start_time: Some(format!("{:02}:00", 8 + (time / 12) % 10)),
                end_time: Some(format!("{:02}:30", 8 + (time / 12) % 10)),
                collector_name: Some(collectors[i % collectors.len()].to_string()),
                notes: dodgey.then(|| "water cloudy, tank disturbed".to_string()),
            });
        }
    }

    // A crayfish weighed but never put in a trial.
    crayfish.push(RawCrayfishRow {
        week: "10".to_string(),
        crayfish_id: "SPARE01".to_string(),
        weight: Some("6.4".to_string()),
        berried: Some("N".to_string()),
    });

    SampleData { crayfish, trials }
}

impl SampleData {
    /// Both sheets as CSV text: (crayfish, trials).
    pub fn to_csv(&self) -> Result<(String, String)> {
        let mut crayfish = Vec::new();
        write_csv(&mut crayfish, &self.crayfish)?;
        let mut trials = Vec::new();
        write_csv(&mut trials, &self.trials)?;
        Ok((
            String::from_utf8_lossy(&crayfish).into_owned(),
            String::from_utf8_lossy(&trials).into_owned(),
        ))
    }

    /// Write both sheets into `dir` under the configured file names.
    pub fn write_to_dir(&self, dir: &Path, config: &PipelineConfig) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        let crayfish_path = dir.join(&config.crayfish_file);
        let trials_path = dir.join(&config.trials_file);
        let file = File::create(&crayfish_path).map_err(|e| PipelineError::io(&crayfish_path, e))?;
        write_csv(file, &self.crayfish)?;
        let file = File::create(&trials_path).map_err(|e| PipelineError::io(&trials_path, e))?;
        write_csv(file, &self.trials)?;
        Ok((crayfish_path, trials_path))
    }
}
