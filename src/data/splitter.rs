// ============================================================
// Layer 4 — Train/Eval Splitter
// ============================================================
// Shuffles manifest rows and splits them into a training set
// and an evaluation set before any shards are written, so the
// two sets never share a volume.
//
// The shuffle takes the RNG from the caller: the same seed
// always yields the same split.
//
// Uses Fisher-Yates shuffle via rand::seq::SliceRandom.

use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffle `samples` with `rng` and split into (train, eval).
///
/// `eval_fraction` is clamped to [0, 1]; the evaluation set gets
/// `round(len * eval_fraction)` samples.
pub fn split_train_eval<T, R: Rng + ?Sized>(
    mut samples:   Vec<T>,
    eval_fraction: f64,
    rng:           &mut R,
) -> (Vec<T>, Vec<T>) {
    samples.shuffle(rng);

    let total    = samples.len();
    let n_eval   = ((total as f64) * eval_fraction.clamp(0.0, 1.0)).round() as usize;
    let split_at = total - n_eval.min(total);

    let eval = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} evaluation",
        samples.len(),
        eval.len(),
    );

    (samples, eval)
}
