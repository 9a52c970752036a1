use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{AudioConfig, Result};

/// Read-only tap on the master output, used to feed waveform and spectrum
/// displays. Keeps the most recent `fft_size` samples in a ring.
pub struct AnalysisTap {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    ring: Vec<f32>,
    write_pos: usize,
    smoothed: Vec<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl AnalysisTap {
    pub fn new(config: &AudioConfig) -> Self {
        let fft_size = config.fft_size.max(32).next_power_of_two();
        Self {
            fft_size,
            smoothing: config.smoothing.clamp(0.0, 0.99),
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels.max(config.min_decibels + 1.0),
            ring: vec![0.0; fft_size],
            write_pos: 0,
            smoothed: vec![0.0; fft_size / 2],
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Number of values returned by the data accessors.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn push(&mut self, samples: &[f32]) {
        for sample in samples {
            self.ring[self.write_pos] = *sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// Latest samples as unsigned bytes, 128 being silence.
    pub fn time_domain_data(&self) -> Vec<u8> {
        let count = self.bin_count();
        self.latest(count)
            .map(|sample| (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8)
            .collect()
    }

    /// Smoothed magnitude spectrum scaled from the decibel window to bytes.
    pub fn frequency_data(&mut self) -> Result<Vec<u8>> {
        let size = self.fft_size;
        let window: Vec<f32> = self.latest(size).collect();
        let fft = prepare_fft(&mut self.fft, &mut self.fft_planner, size);

        for (index, value) in window.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, size);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let tau = self.smoothing;
        let range = self.max_decibels - self.min_decibels;
        let mut bytes = Vec::with_capacity(self.smoothed.len());
        for (smoothed, bin) in self.smoothed.iter_mut().zip(fft.spectrum.iter()) {
            let magnitude = bin.norm() / size as f32;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;

            let decibels = if *smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 * (decibels - self.min_decibels) / range;
            bytes.push(scaled.clamp(0.0, 255.0) as u8);
        }

        Ok(bytes)
    }

    fn latest(&self, count: usize) -> impl Iterator<Item = f32> + '_ {
        let start = (self.write_pos + self.fft_size - count) % self.fft_size;
        (0..count).map(move |offset| self.ring[(start + offset) % self.fft_size])
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for AnalysisTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTap")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("write_pos", &self.write_pos)
            .field("fft_planned", &self.fft.is_some())
            .finish()
    }
}

fn prepare_fft<'a>(
    slot: &'a mut Option<FftResources>,
    planner: &mut RealFftPlanner<f32>,
    size: usize,
) -> &'a mut FftResources {
    slot.get_or_insert_with(|| {
        let plan = planner.plan_fft_forward(size);
        FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    })
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
