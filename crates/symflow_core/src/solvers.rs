use crate::traits::{DynamicalSystem, EmbeddedStep, Scalar, Steppable};

/// Classic Runge-Kutta 4th order, fixed step.
pub struct RK4<T: Scalar> {
    k: [Vec<T>; 4],
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k: std::array::from_fn(|_| vec![T::zero(); dim]),
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let half = T::lit(0.5);
        let t0 = *t;
        let [k1, k2, k3, k4] = &mut self.k;

        system.apply(t0, state, k1);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * half * k1[i];
        }
        system.apply(t0 + dt * half, &self.tmp, k2);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * half * k2[i];
        }
        system.apply(t0 + dt * half, &self.tmp, k3);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * k3[i];
        }
        system.apply(t0 + dt, &self.tmp, k4);

        let sixth = T::lit(1.0 / 6.0);
        let two = T::lit(2.0);
        for i in 0..state.len() {
            state[i] = state[i] + dt * sixth * (k1[i] + two * k2[i] + two * k3[i] + k4[i]);
        }

        *t = t0 + dt;
    }
}

const TSIT5_C: [f64; 6] = [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0];

const TSIT5_A: [&[f64]; 6] = [
    &[],
    &[0.161],
    &[-0.008480655492356989, 0.335480655492357],
    &[2.897153057105493, -6.359448489975075, 4.3622954328695815],
    &[
        5.325864828439257,
        -11.748883564062828,
        7.4955393428898365,
        -0.09249506636175525,
    ],
    &[
        5.86145544294642,
        -12.92096931784711,
        8.159367898576159,
        -0.071584973281401,
        -0.028269050394068383,
    ],
];

/// 5th order weights; the last stage is evaluated at the new point (FSAL).
const TSIT5_B: [f64; 6] = [
    0.09646076681806523,
    0.01,
    0.4798896504144996,
    1.379008574103742,
    -3.290069515436081,
    2.324710524099774,
];

/// Difference between the 5th and embedded 4th order weights.
const TSIT5_BTILDE: [f64; 7] = [
    -0.00178001105222577714,
    -0.0008164344596567469,
    0.007880878010261995,
    -0.1447110071732629,
    0.5823571654525552,
    -0.45808210592918697,
    1.0 / 66.0,
];

/// Tsitouras 5(4) with embedded error estimate.
pub struct Tsit5<T: Scalar> {
    k: [Vec<T>; 7],
    tmp: Vec<T>,
    // k[0] holds f(t, state) for the current accepted point
    first_stage_ready: bool,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k: std::array::from_fn(|_| vec![T::zero(); dim]),
            tmp: vec![T::zero(); dim],
            first_stage_ready: false,
        }
    }

    /// Promotes the last attempted step: its final stage becomes the first
    /// stage of the next step.
    pub fn accept(&mut self) {
        self.k.swap(0, 6);
        self.first_stage_ready = true;
    }

    /// Forgets cached stages, e.g. after the state is changed externally.
    pub fn reset(&mut self) {
        self.first_stage_ready = false;
    }

    fn stages(&mut self, system: &impl DynamicalSystem<T>, t: T, state: &[T], dt: T) {
        if !self.first_stage_ready {
            system.apply(t, state, &mut self.k[0]);
            self.first_stage_ready = true;
        }
        for stage in 1..6 {
            let row = TSIT5_A[stage];
            for i in 0..state.len() {
                let mut acc = T::zero();
                for (j, a) in row.iter().enumerate() {
                    acc = acc + T::lit(*a) * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t + T::lit(TSIT5_C[stage]) * dt, &self.tmp, &mut self.k[stage]);
        }
    }
}

impl<T: Scalar> EmbeddedStep<T> for Tsit5<T> {
    fn error_order(&self) -> i32 {
        4
    }

    fn attempt(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        next: &mut [T],
        error: &mut [T],
    ) {
        self.stages(system, t, state, dt);

        for i in 0..state.len() {
            let mut acc = T::zero();
            for (j, b) in TSIT5_B.iter().enumerate() {
                acc = acc + T::lit(*b) * self.k[j][i];
            }
            next[i] = state[i] + dt * acc;
        }
        system.apply(t + dt, next, &mut self.k[6]);

        for i in 0..state.len() {
            let mut acc = T::zero();
            for (j, e) in TSIT5_BTILDE.iter().enumerate() {
                acc = acc + T::lit(*e) * self.k[j][i];
            }
            error[i] = dt * acc;
        }
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let mut next = vec![T::zero(); state.len()];
        let mut error = vec![T::zero(); state.len()];
        self.attempt(system, *t, state, dt, &mut next, &mut error);
        self.accept();
        state.copy_from_slice(&next);
        *t = *t + dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Decay;

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -x[0];
        }
    }

    struct Rotation;

    impl DynamicalSystem<f64> for Rotation {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[1];
            out[1] = -x[0];
        }
    }

    #[test]
    fn tableau_rows_are_consistent() {
        for (stage, row) in TSIT5_A.iter().enumerate() {
            let sum: f64 = row.iter().sum();
            assert_relative_eq!(sum, TSIT5_C[stage], epsilon = 1e-12);
        }
        assert_relative_eq!(TSIT5_B.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(TSIT5_BTILDE.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rk4_integrates_exponential_decay() {
        let mut solver = RK4::new(1);
        let mut t = 0.0;
        let mut state = [1.0];
        for _ in 0..100 {
            solver.step(&Decay, &mut t, &mut state, 0.01);
        }
        assert_relative_eq!(t, 1.0, epsilon = 1e-12);
        assert_relative_eq!(state[0], (-1.0_f64).exp(), max_relative = 1e-9);
    }

    #[test]
    fn tsit5_fixed_steps_preserve_rotation_radius() {
        let mut solver = Tsit5::new(2);
        let mut t = 0.0;
        let mut state = [1.0, 0.0];
        let dt = std::f64::consts::PI / 50.0;
        for _ in 0..100 {
            solver.step(&Rotation, &mut t, &mut state, dt);
        }
        // one full period
        assert_relative_eq!(state[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(state[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn tsit5_error_estimate_shrinks_with_step() {
        let mut solver = Tsit5::new(1);
        let mut next = [0.0];
        let mut err_coarse = [0.0];
        let mut err_fine = [0.0];
        solver.attempt(&Decay, 0.0, &[1.0], 0.5, &mut next, &mut err_coarse);
        solver.attempt(&Decay, 0.0, &[1.0], 0.25, &mut next, &mut err_fine);
        assert!(err_fine[0].abs() < err_coarse[0].abs());
        // a rejected attempt leaves the first stage valid for a retry
        assert_relative_eq!(next[0], (-0.25_f64).exp(), max_relative = 1e-7);
    }
}
