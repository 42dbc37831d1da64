//! Constant-velocity Kalman filter for bounding box tracking, using ndarray for
//! the state and nalgebra for the 4x4 innovation solve.
//!
//! The 8-dimensional state is the encoded box (see [`BoxEncoding`]) followed by
//! its per-frame velocities. Noise is scaled by box size so the filter behaves
//! the same way for near and far objects.

use nalgebra::Matrix4;
use ndarray::{Array1, Array2, s};
use serde::{Deserialize, Serialize};

use crate::error::TrackError;
use crate::tracker::rect::Rect;

const NDIM: usize = 4;

/// Layout of the four measured box components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoxEncoding {
    /// Center x, center y, aspect ratio (w/h), height.
    #[default]
    Xyah,
    /// Center x, center y, width, height.
    Xywh,
}

impl BoxEncoding {
    pub fn encode(self, rect: &Rect) -> [f64; 4] {
        let v = match self {
            BoxEncoding::Xyah => rect.to_xyah(),
            BoxEncoding::Xywh => rect.to_xywh(),
        };
        [v[0] as f64, v[1] as f64, v[2] as f64, v[3] as f64]
    }

    pub fn decode(self, mean: &Array1<f64>) -> Rect {
        let (cx, cy, c, h) = (mean[0] as f32, mean[1] as f32, mean[2] as f32, mean[3] as f32);
        match self {
            BoxEncoding::Xyah => Rect::from_xyah(cx, cy, c, h),
            BoxEncoding::Xywh => Rect::from_xywh(cx, cy, c, h),
        }
    }
}

/// A 2x3 affine warp `[[a, b, tx], [c, d, ty]]` mapping previous-frame pixel
/// coordinates to current-frame coordinates.
pub type CameraMotion = [[f64; 3]; 2];

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Array2<f64>,
    update_mat: Array2<f64>,
    std_weight_position: f64,
    std_weight_velocity: f64,
    encoding: BoxEncoding,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new(BoxEncoding::Xyah)
    }
}

impl KalmanFilter {
    pub fn new(encoding: BoxEncoding) -> Self {
        let mut motion_mat = Array2::eye(2 * NDIM);
        for i in 0..NDIM {
            motion_mat[[i, NDIM + i]] = 1.0;
        }

        let mut update_mat = Array2::zeros((NDIM, 2 * NDIM));
        for i in 0..NDIM {
            update_mat[[i, i]] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
            encoding,
        }
    }

    pub fn encoding(&self) -> BoxEncoding {
        self.encoding
    }

    /// Position noise for the four measured components, scaled by box size.
    /// `aspect_std` is only used by the XYAH layout, whose third component
    /// is unitless.
    fn position_std(&self, m: &[f64], weight: f64, aspect_std: f64) -> [f64; 4] {
        let (w, h) = (m[2], m[3]);
        match self.encoding {
            BoxEncoding::Xyah => [weight * h, weight * h, aspect_std, weight * h],
            BoxEncoding::Xywh => [weight * w, weight * h, weight * w, weight * h],
        }
    }

    fn velocity_std(&self, m: &[f64], weight: f64) -> [f64; 4] {
        let (w, h) = (m[2], m[3]);
        match self.encoding {
            BoxEncoding::Xyah => [weight * h, weight * h, 1e-5, weight * h],
            BoxEncoding::Xywh => [weight * w, weight * h, weight * w, weight * h],
        }
    }

    /// Create a track distribution from an unassociated measurement, with zero velocity.
    pub fn initiate(&self, measurement: [f64; 4]) -> (Array1<f64>, Array2<f64>) {
        let mut mean = Array1::zeros(2 * NDIM);
        mean.slice_mut(s![..NDIM]).assign(&Array1::from_vec(measurement.to_vec()));

        let pos = self.position_std(&measurement, 2.0 * self.std_weight_position, 1e-2);
        let vel = self.velocity_std(&measurement, 10.0 * self.std_weight_velocity);
        (mean, diag_squared(pos.iter().chain(vel.iter())))
    }

    pub fn predict(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let m = [mean[0], mean[1], mean[2], mean[3]];
        let pos = self.position_std(&m, self.std_weight_position, 1e-2);
        let vel = self.velocity_std(&m, self.std_weight_velocity);
        let motion_cov = diag_squared(pos.iter().chain(vel.iter()));

        let new_mean = self.motion_mat.dot(mean);
        let new_covariance =
            self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + motion_cov;

        (new_mean, symmetrize(new_covariance))
    }

    fn measurement_noise(&self, mean: &Array1<f64>) -> Array2<f64> {
        let m = [mean[0], mean[1], mean[2], mean[3]];
        diag_squared(self.position_std(&m, self.std_weight_position, 1e-1).iter())
    }

    /// Project the state distribution into measurement space.
    pub fn project(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let mean_proj = self.update_mat.dot(mean);
        let covariance_proj = self.update_mat.dot(covariance).dot(&self.update_mat.t())
            + self.measurement_noise(mean);
        (mean_proj, covariance_proj)
    }

    /// Correction step. The covariance is updated in Joseph form and
    /// re-symmetrized so it stays positive semi-definite over long sequences.
    pub fn update(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurement: [f64; 4],
    ) -> Result<(Array1<f64>, Array2<f64>), TrackError> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);
        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        // K = P * H^T * S^-1
        let s_inv = invert_spd_4x4(&projected_cov)?;
        let kalman_gain = covariance.dot(&self.update_mat.t()).dot(&s_inv);

        let new_mean = mean + &kalman_gain.dot(&innovation);

        // P' = (I - KH) P (I - KH)^T + K R K^T
        let i_kh = Array2::<f64>::eye(2 * NDIM) - kalman_gain.dot(&self.update_mat);
        let noise = self.measurement_noise(mean);
        let new_covariance = i_kh.dot(covariance).dot(&i_kh.t())
            + kalman_gain.dot(&noise).dot(&kalman_gain.t());

        Ok((new_mean, symmetrize(new_covariance)))
    }

    /// Warp a state distribution by a camera motion estimate. Center and
    /// center velocity are rotated and translated; for the XYWH layout the
    /// size terms are rotated as well.
    pub fn apply_camera_motion(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        warp: &CameraMotion,
    ) -> (Array1<f64>, Array2<f64>) {
        let mut transform = Array2::<f64>::eye(2 * NDIM);
        let blocks: &[usize] = match self.encoding {
            BoxEncoding::Xyah => &[0, 4],
            BoxEncoding::Xywh => &[0, 2, 4, 6],
        };
        for &b in blocks {
            transform[[b, b]] = warp[0][0];
            transform[[b, b + 1]] = warp[0][1];
            transform[[b + 1, b]] = warp[1][0];
            transform[[b + 1, b + 1]] = warp[1][1];
        }

        let mut new_mean = transform.dot(mean);
        new_mean[0] += warp[0][2];
        new_mean[1] += warp[1][2];
        let new_covariance = transform.dot(covariance).dot(&transform.t());
        (new_mean, symmetrize(new_covariance))
    }
}

fn diag_squared<'a>(std: impl Iterator<Item = &'a f64>) -> Array2<f64> {
    let var: Vec<f64> = std.map(|s| s * s).collect();
    Array2::from_diag(&Array1::from_vec(var))
}

fn symmetrize(m: Array2<f64>) -> Array2<f64> {
    let t = m.t().to_owned();
    (m + t) * 0.5
}

/// Invert the innovation covariance through its Cholesky factor.
fn invert_spd_4x4(m: &Array2<f64>) -> Result<Array2<f64>, TrackError> {
    let nm = Matrix4::from_fn(|i, j| m[[i, j]]);
    let inv = nm
        .cholesky()
        .map(|c| c.inverse())
        .ok_or_else(|| {
            TrackError::Numerical("innovation covariance is not positive definite".to_string())
        })?;
    Ok(Array2::from_shape_fn((NDIM, NDIM), |(i, j)| inv[(i, j)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn is_symmetric_psd(cov: &Array2<f64>) -> bool {
        let nm = nalgebra::DMatrix::from_fn(8, 8, |i, j| cov[[i, j]]);
        let symmetric = (0..8).all(|i| (0..8).all(|j| (cov[[i, j]] - cov[[j, i]]).abs() < 1e-9));
        symmetric && nm.symmetric_eigenvalues().iter().all(|&v| v > -1e-9)
    }

    #[test]
    fn test_initiate() {
        let kf = KalmanFilter::new(BoxEncoding::Xyah);
        let (mean, cov) = kf.initiate([100.0, 200.0, 0.5, 50.0]);
        assert_eq!(mean[0], 100.0);
        assert_eq!(mean[3], 50.0);
        assert!(mean.slice(s![4..]).iter().all(|&v| v == 0.0));
        // 2 * (1/20) * 50
        assert_abs_diff_eq!(cov[[0, 0]], 25.0, epsilon = 1e-9);
    }

    #[test]
    fn test_uncertainty_scales_with_box_size() {
        for encoding in [BoxEncoding::Xyah, BoxEncoding::Xywh] {
            let kf = KalmanFilter::new(encoding);
            let (_, small) = kf.initiate([0.0, 0.0, 10.0, 10.0]);
            let (_, large) = kf.initiate([0.0, 0.0, 100.0, 100.0]);
            assert!(large[[0, 0]] > small[[0, 0]]);
            assert!(large[[4, 4]] > small[[4, 4]]);
        }
    }

    #[test]
    fn test_predict_applies_velocity() {
        let kf = KalmanFilter::new(BoxEncoding::Xywh);
        let (mut mean, cov) = kf.initiate([10.0, 20.0, 30.0, 40.0]);
        mean[4] = 2.0;
        mean[5] = -1.0;
        let (pred, pred_cov) = kf.predict(&mean, &cov);
        assert_eq!(pred[0], 12.0);
        assert_eq!(pred[1], 19.0);
        assert!(pred_cov[[0, 0]] > cov[[0, 0]]);
    }

    #[test]
    fn test_correct_with_predicted_box_has_no_innovation() {
        let kf = KalmanFilter::new(BoxEncoding::Xyah);
        let (mut mean, mut cov) = kf.initiate([50.0, 60.0, 0.5, 40.0]);
        mean[4] = 3.0;
        mean[5] = 1.5;
        for _ in 0..5 {
            (mean, cov) = kf.predict(&mean, &cov);
        }
        let (projected, _) = kf.project(&mean, &cov);
        let measurement = [projected[0], projected[1], projected[2], projected[3]];
        let (corrected, _) = kf.update(&mean, &cov, measurement).unwrap();
        for i in 0..8 {
            assert_abs_diff_eq!(corrected[i], mean[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_update_moves_towards_measurement() {
        let kf = KalmanFilter::new(BoxEncoding::Xyah);
        let (mean, cov) = kf.initiate([100.0, 100.0, 1.0, 50.0]);
        let (pred, pred_cov) = kf.predict(&mean, &cov);
        let (updated, updated_cov) = kf.update(&pred, &pred_cov, [110.0, 100.0, 1.0, 50.0]).unwrap();
        assert!(updated[0] > 100.0 && updated[0] < 110.0);
        assert!(updated[4] > 0.0);
        assert!(updated_cov[[0, 0]] < pred_cov[[0, 0]]);
    }

    #[test]
    fn test_covariance_stays_psd_over_long_sequence() {
        let kf = KalmanFilter::new(BoxEncoding::Xywh);
        let (mut mean, mut cov) = kf.initiate([100.0, 100.0, 40.0, 80.0]);
        for frame in 0..500 {
            (mean, cov) = kf.predict(&mean, &cov);
            let x = 100.0 + frame as f64 * 0.7;
            (mean, cov) = kf.update(&mean, &cov, [x, 100.0, 40.0, 80.0]).unwrap();
        }
        assert!(is_symmetric_psd(&cov));
    }

    #[test]
    fn test_singular_innovation_is_an_error() {
        let kf = KalmanFilter::new(BoxEncoding::Xywh);
        let mean = Array1::zeros(8);
        let cov = Array2::zeros((8, 8));
        assert!(matches!(
            kf.update(&mean, &cov, [0.0; 4]),
            Err(TrackError::Numerical(_))
        ));
    }

    #[test]
    fn test_camera_motion_translation() {
        let kf = KalmanFilter::new(BoxEncoding::Xywh);
        let (mean, cov) = kf.initiate([150.0, 150.0, 100.0, 100.0]);
        let warp = [[1.0, 0.0, 5.0], [0.0, 1.0, -3.0]];
        let (moved, moved_cov) = kf.apply_camera_motion(&mean, &cov, &warp);
        assert_eq!(moved[0], 155.0);
        assert_eq!(moved[1], 147.0);
        assert_eq!(moved[2], 100.0);
        assert_eq!(moved_cov, cov);
    }

    #[test]
    fn test_encoding_round_trip() {
        let rect = Rect::new(10.0, 20.0, 30.0, 40.0);
        for encoding in [BoxEncoding::Xyah, BoxEncoding::Xywh] {
            let mut mean = Array1::zeros(8);
            for (i, v) in encoding.encode(&rect).iter().enumerate() {
                mean[i] = *v;
            }
            let back = encoding.decode(&mean);
            assert_abs_diff_eq!(back.x, rect.x, epsilon = 1e-4);
            assert_abs_diff_eq!(back.width, rect.width, epsilon = 1e-4);
        }
    }
}
