//! Working-set selection shared by both SMO variants
//!
//! Everything here works in the "y-space" formulation of the dual:
//! minimise `f(a) = ½ aᵀQa - eᵀa` with `Q_ij = y_i y_j K_ij`,
//! `0 <= a_i <= C_i` and `yᵀa = 0`, where the gradient is `G = Qa - e`.
//!
//! * `I_up`  = { t | y_t = +1, a_t < C_t } ∪ { t | y_t = -1, a_t > 0 }
//! * `I_low` = { t | y_t = +1, a_t > 0 } ∪ { t | y_t = -1, a_t < C_t }
//!
//! The duality-gap estimate is `max_{I_up} -y_t G_t - min_{I_low} -y_t G_t`.

/// Bound state of one multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaStatus {
    LowerBound,
    UpperBound,
    Free,
    /// `C_t == 0`: the multiplier can never move
    Fixed,
}

impl AlphaStatus {
    pub fn of(alpha: f64, c: f64) -> Self {
        if c <= 0.0 {
            AlphaStatus::Fixed
        } else if alpha >= c {
            AlphaStatus::UpperBound
        } else if alpha <= 0.0 {
            AlphaStatus::LowerBound
        } else {
            AlphaStatus::Free
        }
    }

    /// Member of `I_up` for label `y`
    #[inline]
    pub fn is_up(self, y: f64) -> bool {
        match self {
            AlphaStatus::Fixed => false,
            AlphaStatus::Free => true,
            AlphaStatus::LowerBound => y > 0.0,
            AlphaStatus::UpperBound => y < 0.0,
        }
    }

    /// Member of `I_low` for label `y`
    #[inline]
    pub fn is_low(self, y: f64) -> bool {
        match self {
            AlphaStatus::Fixed => false,
            AlphaStatus::Free => true,
            AlphaStatus::LowerBound => y < 0.0,
            AlphaStatus::UpperBound => y > 0.0,
        }
    }
}

/// Extremes of `-y_t G_t` over the up and low sets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViolatingPair {
    /// Arg-max of `-y_t G_t` over `I_up`
    pub i: Option<usize>,
    /// Arg-min of `-y_t G_t` over `I_low`
    pub j: Option<usize>,
    pub max_up: f64,
    pub min_low: f64,
}

impl ViolatingPair {
    /// Duality-gap estimate; `-inf` when either set is empty
    pub fn gap(&self) -> f64 {
        if self.i.is_none() || self.j.is_none() {
            f64::NEG_INFINITY
        } else {
            self.max_up - self.min_low
        }
    }
}

/// Scan `candidates` for the maximum-violating pair
pub fn find_maximum_violating_pair<I>(
    candidates: I,
    y: &[f64],
    grad: &[f64],
    status: &[AlphaStatus],
) -> ViolatingPair
where
    I: IntoIterator<Item = usize>,
{
    let mut pair = ViolatingPair {
        i: None,
        j: None,
        max_up: f64::NEG_INFINITY,
        min_low: f64::INFINITY,
    };
    for t in candidates {
        let value = -y[t] * grad[t];
        if status[t].is_up(y[t]) && value > pair.max_up {
            pair.max_up = value;
            pair.i = Some(t);
        }
        if status[t].is_low(y[t]) && value < pair.min_low {
            pair.min_low = value;
            pair.j = Some(t);
        }
    }
    pair
}

/// Second-order choice of `j` for a fixed `i`
///
/// Minimises `-b²/a` over `t in I_low` with `b = max_up + y_t G_t > 0` and
/// `a = K_ii + K_tt - 2 K_it`, replacing a non-positive `a` by `tau`.
/// `kernel_i(t)` returns `K_it` and `diag(t)` returns `K_tt`.
#[allow(clippy::too_many_arguments)]
pub fn select_second_order<I, KI, KD>(
    candidates: I,
    max_up: f64,
    k_ii: f64,
    y: &[f64],
    grad: &[f64],
    status: &[AlphaStatus],
    kernel_i: KI,
    diag: KD,
    tau: f64,
) -> Option<usize>
where
    I: IntoIterator<Item = usize>,
    KI: Fn(usize) -> f64,
    KD: Fn(usize) -> f64,
{
    let mut best = None;
    let mut best_objective = f64::INFINITY;
    for t in candidates {
        if !status[t].is_low(y[t]) {
            continue;
        }
        let b = max_up + y[t] * grad[t];
        if b <= 0.0 {
            continue;
        }
        let a = curvature(k_ii, diag(t), kernel_i(t), tau);
        let objective = -(b * b) / a;
        if objective < best_objective {
            best_objective = objective;
            best = Some(t);
        }
    }
    best
}

/// `K_ii + K_jj - 2 K_ij`, floored at `tau`
#[inline]
pub fn curvature(k_ii: f64, k_jj: f64, k_ij: f64, tau: f64) -> f64 {
    let a = k_ii + k_jj - 2.0 * k_ij;
    if a > 0.0 {
        a
    } else {
        tau
    }
}

/// Closed-form step for the pair `(i, j)`, `i in I_up`, `j in I_low`
///
/// Moves `a_i += y_i * delta` and `a_j -= y_j * delta`, with `delta` clipped
/// so both multipliers stay inside their boxes. Returns the applied changes
/// `(da_i, da_j)`.
#[allow(clippy::too_many_arguments)]
pub fn update_pair(
    alpha_i: &mut f64,
    alpha_j: &mut f64,
    y_i: f64,
    y_j: f64,
    c_i: f64,
    c_j: f64,
    b: f64,
    a: f64,
) -> (f64, f64) {
    // Room left along each multiplier's feasible direction
    let room_i = if y_i > 0.0 { c_i - *alpha_i } else { *alpha_i };
    let room_j = if y_j > 0.0 { *alpha_j } else { c_j - *alpha_j };
    let delta = (b / a).min(room_i).min(room_j).max(0.0);

    let old_i = *alpha_i;
    let old_j = *alpha_j;
    *alpha_i = step_towards_bound(old_i, y_i * delta, c_i, delta >= room_i, y_i > 0.0);
    *alpha_j = step_towards_bound(old_j, -y_j * delta, c_j, delta >= room_j, y_j < 0.0);
    (*alpha_i - old_i, *alpha_j - old_j)
}

/// Apply `change`, snapping exactly onto the bound when the step used all the room
#[inline]
fn step_towards_bound(alpha: f64, change: f64, c: f64, exhausted: bool, towards_upper: bool) -> f64 {
    if exhausted {
        if towards_upper {
            c
        } else {
            0.0
        }
    } else {
        (alpha + change).clamp(0.0, c)
    }
}

/// Bias from the final gradient
///
/// Averages `y_t G_t` over free multipliers. Without free multipliers the
/// bias is the midpoint of the feasible interval implied by the bounded ones.
/// The decision function is `sum(a_t y_t K(x_t, x)) + bias`.
pub fn compute_bias(y: &[f64], grad: &[f64], status: &[AlphaStatus]) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut sum_free = 0.0;
    let mut n_free = 0usize;

    for t in 0..y.len() {
        let yg = y[t] * grad[t];
        match status[t] {
            AlphaStatus::Free => {
                sum_free += yg;
                n_free += 1;
            }
            AlphaStatus::UpperBound if y[t] < 0.0 => upper = upper.min(yg),
            AlphaStatus::UpperBound => lower = lower.max(yg),
            AlphaStatus::LowerBound if y[t] > 0.0 => upper = upper.min(yg),
            AlphaStatus::LowerBound => lower = lower.max(yg),
            AlphaStatus::Fixed => {}
        }
    }

    let rho = if n_free > 0 {
        sum_free / n_free as f64
    } else {
        match (upper.is_finite(), lower.is_finite()) {
            (true, true) => 0.5 * (upper + lower),
            (true, false) => upper,
            (false, true) => lower,
            (false, false) => 0.0,
        }
    };
    -rho
}

/// Dual objective `sum(a) - ½ aᵀQa`, evaluated as `½ sum(a_t (1 - G_t))`
pub fn dual_objective(alpha: &[f64], grad: &[f64]) -> f64 {
    0.5 * alpha
        .iter()
        .zip(grad)
        .map(|(&a, &g)| a * (1.0 - g))
        .sum::<f64>()
}
