//! Significance filtering of the max-tree into an object map.
//!
//! 1. Every level root is tested for significance, root-to-leaves (each node
//!    sees its closest significant ancestor) or leaves-to-root (each node is
//!    tested against the background, then ancestors are resolved in a second
//!    pass).
//! 2. Each significant node records its largest significant descendant branch
//!    (its *main branch*). A significant node starts a new object when it has no
//!    significant ancestor or is not its ancestor's main branch; a main branch
//!    continues its ancestor's object.
//! 3. Object markers are moved up towards brighter levels by `move_factor`
//!    noise sigmas so that the faint outskirts of an object are not attributed
//!    to it.
//! 4. Every pixel takes the id of its nearest marker on the path to the root.

mod significance;


pub use significance::{ChiSquaredPower, PowerGivenArea, SignificanceTest, TreeContext, make_test};

use common::Buffer2;
use rayon::prelude::*;

use crate::background::BackgroundStats;
use crate::config::{Config, Traversal};
use crate::error::Result;
use crate::maxtree::MaxTree;

/// Sentinel for "no such node" in index relations.
pub const NO_NODE: usize = usize::MAX;

/// Object id of pixels that belong to no object.
pub const BACKGROUND: i64 = -1;

/// Noise model and filtering knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParameters {
    pub bg_variance: f64,
    pub gain: f64,
    pub alpha: f64,
    pub move_factor: f64,
    pub min_distance: f64,
}

impl FilterParameters {
    pub fn new(stats: &BackgroundStats, config: &Config) -> Self {
        Self {
            bg_variance: stats.variance,
            gain: stats.gain,
            alpha: config.alpha,
            move_factor: config.move_factor,
            min_distance: config.min_distance,
        }
    }
}

/// Node counts collected while filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub relevant_nodes: usize,
    pub significant_nodes: usize,
    /// Markers before move-up, nested ones included.
    pub objects: usize,
    pub nested_objects: usize,
    /// Markers after move-up; markers that land on each other count once.
    pub markers: usize,
}

/// Result of [`SignificanceFilter::run`].
#[derive(Debug, Clone)]
pub struct FilterOutput {
    /// Per-pixel object id: the node index of the object marker, or [`BACKGROUND`].
    pub object_ids: Buffer2<i64>,
    /// Per-node closest significant ancestor, [`NO_NODE`] if none.
    pub ancestors: Vec<usize>,
    pub stats: FilterStats,
}

impl FilterOutput {
    fn empty() -> Self {
        Self {
            object_ids: Buffer2::new(0, 0, Vec::new()),
            ancestors: Vec::new(),
            stats: FilterStats::default(),
        }
    }

    pub fn closest_significant_ancestor(&self, node: usize) -> Option<usize> {
        self.ancestors.get(node).copied().filter(|&a| a != NO_NODE)
    }
}

/// Per-node working state of one filtering run.
struct NodeState {
    significant: Vec<bool>,
    object: Vec<bool>,
    ancestors: Vec<usize>,
    main_branches: Vec<usize>,
    main_power_branches: Vec<usize>,
}

impl NodeState {
    fn new(n: usize) -> Self {
        Self {
            significant: vec![false; n],
            object: vec![false; n],
            ancestors: vec![NO_NODE; n],
            main_branches: vec![NO_NODE; n],
            main_power_branches: vec![NO_NODE; n],
        }
    }
}

/// Turns a max-tree into an object id map.
pub struct SignificanceFilter {
    pub params: FilterParameters,
    pub traversal: Traversal,
    test: Box<dyn SignificanceTest>,
}

impl SignificanceFilter {
    pub fn new(params: FilterParameters, traversal: Traversal, test: Box<dyn SignificanceTest>) -> Self {
        Self {
            params,
            traversal,
            test,
        }
    }

    pub fn from_config(config: &Config, stats: &BackgroundStats, kernel_power: f64) -> Self {
        Self::new(
            FilterParameters::new(stats, config),
            config.traversal,
            make_test(config.significance_test, kernel_power),
        )
    }

    pub fn test_name(&self) -> &'static str {
        self.test.name()
    }

    /// Filter `tree` into an object map. An empty tree gives an empty map.
    pub fn run(&mut self, tree: &MaxTree) -> Result<FilterOutput> {
        if tree.is_empty() {
            return Ok(FilterOutput::empty());
        }

        let mut state = NodeState::new(tree.len());
        let mut stats = FilterStats::default();

        let relevant = tree.relevant_nodes();
        stats.relevant_nodes = relevant.len();
        tracing::debug!("Number of nodes to be tested: {}", relevant.len());

        self.test.initialize(&TreeContext {
            tree,
            params: &self.params,
            relevant: &relevant,
            ancestors: &state.ancestors,
        })?;
        tracing::info!("Using significance test: {}", self.test.name());

        stats.significant_nodes = match self.traversal {
            Traversal::Up => self.significant_nodes_up(tree, &relevant, &mut state),
            Traversal::Down => self.significant_nodes_down(tree, &relevant, &mut state),
        };
        tracing::debug!("{} significant nodes", stats.significant_nodes);

        let (objects, nested) = find_objects(&mut state);
        stats.objects = objects;
        stats.nested_objects = nested;
        tracing::info!("Found {} objects (including {} nested)", objects, nested);

        if self.params.move_factor > 0.0 {
            main_power_branches(tree, &mut state);
            move_up(tree, &self.params, &mut state);
        }
        stats.markers = state.object.iter().filter(|&&o| o).count();

        let object_ids = object_ids(tree, &state.object);

        Ok(FilterOutput {
            object_ids,
            ancestors: state.ancestors,
            stats,
        })
    }

    /// Root-to-leaves: ancestors are propagated and each node tested in one pass.
    fn significant_nodes_up(&self, tree: &MaxTree, relevant: &[usize], state: &mut NodeState) -> usize {
        let mut count = 0;
        for &node in relevant {
            state.ancestors[node] = inherited_ancestor(tree, node, state);

            let ctx = TreeContext {
                tree,
                params: &self.params,
                relevant,
                ancestors: &state.ancestors,
            };
            if self.test.evaluate(node, &ctx) {
                state.significant[node] = true;
                count += 1;
                update_main_branch(tree, node, state);
            }
        }
        count
    }

    /// Leaves-to-root: every node is tested against the background in parallel,
    /// then ancestors and main branches are resolved root-to-leaves. The
    /// `min_distance` rule is applied again in that pass, against the resolved
    /// closest significant ancestor.
    fn significant_nodes_down(&self, tree: &MaxTree, relevant: &[usize], state: &mut NodeState) -> usize {
        let ctx = TreeContext {
            tree,
            params: &self.params,
            relevant,
            ancestors: &state.ancestors,
        };
        let verdicts: Vec<(usize, bool)> = relevant
            .par_iter()
            .rev()
            .map(|&node| (node, self.test.evaluate(node, &ctx)))
            .collect();

        let mut count = 0;
        for (node, significant) in verdicts {
            if significant {
                state.significant[node] = true;
                count += 1;
            }
        }

        for &node in relevant {
            state.ancestors[node] = inherited_ancestor(tree, node, state);
            if !state.significant[node] {
                continue;
            }

            let ctx = TreeContext {
                tree,
                params: &self.params,
                relevant,
                ancestors: &state.ancestors,
            };
            if !ctx.clears_min_distance(node, ctx.noise_variance(node)) {
                state.significant[node] = false;
                count -= 1;
                continue;
            }
            update_main_branch(tree, node, state);
        }
        count
    }
}

/// The parent if significant, else the parent's closest significant ancestor.
#[inline]
fn inherited_ancestor(tree: &MaxTree, node: usize, state: &NodeState) -> usize {
    let parent = tree.parent(node);
    if state.significant[parent] {
        parent
    } else {
        state.ancestors[parent]
    }
}

/// Offer `node` as the main branch of its closest significant ancestor; the larger area wins.
fn update_main_branch(tree: &MaxTree, node: usize, state: &mut NodeState) {
    let ancestor = state.ancestors[node];
    if ancestor == NO_NODE {
        return;
    }
    let current = state.main_branches[ancestor];
    if current == NO_NODE || tree.area(current) < tree.area(node) {
        state.main_branches[ancestor] = node;
    }
}

/// Mark object markers. Returns `(all, nested)` counts.
fn find_objects(state: &mut NodeState) -> (usize, usize) {
    let mut top_level = 0;
    let mut nested = 0;
    for node in 0..state.significant.len() {
        if !state.significant[node] {
            continue;
        }
        match state.ancestors[node] {
            NO_NODE => {
                state.object[node] = true;
                top_level += 1;
            }
            ancestor if state.main_branches[ancestor] != node => {
                state.object[node] = true;
                nested += 1;
            }
            _ => {}
        }
    }
    (top_level + nested, nested)
}

/// For every node with children, the child carrying the most power above the node's level.
///
/// Masked children are never chosen.
fn main_power_branches(tree: &MaxTree, state: &mut NodeState) {
    for node in 0..tree.len() {
        if tree.is_root(node) || !tree.level(node).is_finite() {
            continue;
        }
        let parent = tree.parent(node);
        let reference = tree.level(parent);
        let current = state.main_power_branches[parent];
        if current == NO_NODE
            || tree.power_above(current, reference) < tree.power_above(node, reference)
        {
            state.main_power_branches[parent] = node;
        }
    }
}

/// Move each marker up its main branch until it clears the local noise by `move_factor` sigmas.
fn move_up(tree: &MaxTree, params: &FilterParameters, state: &mut NodeState) {
    let mut fixed = vec![false; tree.len()];

    for node in 0..tree.len() {
        if !state.object[node] || fixed[node] {
            continue;
        }
        state.object[node] = false;

        let reference = match state.ancestors[node] {
            NO_NODE => 0.0,
            ancestor => tree.level(ancestor),
        };
        let base = reference + params.move_factor * (reference / params.gain + params.bg_variance).sqrt();

        let mut next = node;
        while tree.level(next) < base {
            next = if state.main_branches[next] != NO_NODE {
                state.main_branches[next]
            } else if state.main_power_branches[next] != NO_NODE {
                state.main_power_branches[next]
            } else {
                break;
            };
        }

        state.object[next] = true;
        fixed[next] = true;
    }
}

/// Label every pixel with the node index of its nearest ancestor-or-self marker.
fn object_ids(tree: &MaxTree, object: &[bool]) -> Buffer2<i64> {
    let n = tree.len();
    let mut ids = vec![BACKGROUND; n];
    let mut checked = vec![false; n];

    let up = |node: usize| (!tree.is_root(node)).then(|| tree.parent(node));

    for start in 0..n {
        if checked[start] {
            continue;
        }

        let mut next = Some(start);
        while let Some(node) = next {
            if object[node] || checked[node] {
                break;
            }
            checked[node] = true;
            next = up(node);
        }

        let (id, end) = match next {
            None => (BACKGROUND, None),
            Some(node) if checked[node] => (ids[node], Some(node)),
            Some(marker) => {
                checked[marker] = true;
                (marker as i64, up(marker))
            }
        };

        let mut node = start;
        loop {
            ids[node] = id;
            let parent = up(node);
            if parent == end {
                break;
            }
            match parent {
                Some(p) => node = p,
                None => break,
            }
        }
    }

    let image = tree.image();
    Buffer2::new(image.width(), image.height(), ids)
}
