//! Age decoding from an age-bucket probability histogram.

/// Number of age buckets the estimator predicts over.
pub const AGE_BUCKETS: usize = 20;

/// Bucket midpoints: 2.5, 7.5, ..., 97.5 (five-year buckets).
pub const AGE_BUCKET_MIDPOINTS: [f32; AGE_BUCKETS] = [
    2.5, 7.5, 12.5, 17.5, 22.5, 27.5, 32.5, 37.5, 42.5, 47.5, 52.5, 57.5, 62.5, 67.5, 72.5, 77.5,
    82.5, 87.5, 92.5, 97.5,
];

/// Probability distribution over [`AGE_BUCKETS`] buckets.
pub type AgeDistribution = [f32; AGE_BUCKETS];

/// Expected age: dot product of the distribution with the bucket midpoints.
pub fn decode_age(probabilities: &AgeDistribution) -> f32 {
    probabilities
        .iter()
        .zip(AGE_BUCKET_MIDPOINTS.iter())
        .map(|(p, m)| p * m)
        .sum()
}
