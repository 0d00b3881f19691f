use crate::memory::HazardError;
use crate::structures::Stack;
use im::Vector;
use rand::Rng;

/// One step of a sequential history.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation<T> {
    Push(T),
    Pop,
}

/// A persistent reference stack; cloning it snapshots the state in O(1).
#[derive(Debug, Clone, PartialEq)]
pub struct SequentialModel<T: Clone> {
    items: Vector<T>,
}

impl<T: Clone> SequentialModel<T> {
    pub fn new() -> Self {
        SequentialModel {
            items: Vector::new(),
        }
    }

    pub fn push(&mut self, val: T) {
        self.items.push_back(val);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> Default for SequentialModel<T> {
    fn default() -> Self {
        SequentialModel::new()
    }
}

/// The first pop whose result differs from the model's.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence<T> {
    pub step: usize,
    pub expected: Option<T>,
    pub actual: Option<T>,
}

/// Replay `operations` on `stack` and on a fresh [`SequentialModel`] from the calling
/// thread, stopping at the first pop on which they disagree.
pub fn first_divergence<T>(
    stack: &Stack<T>,
    operations: &[Operation<T>],
) -> Result<Option<Divergence<T>>, HazardError>
where
    T: Send + Clone + PartialEq,
{
    let mut model = SequentialModel::new();
    for (step, op) in operations.iter().enumerate() {
        match op {
            Operation::Push(val) => {
                model.push(val.clone());
                stack.push(val.clone());
            }
            Operation::Pop => {
                let expected = model.pop();
                let actual = stack.pop()?;
                if expected != actual {
                    return Ok(Some(Divergence {
                        step,
                        expected,
                        actual,
                    }));
                }
            }
        }
    }
    Ok(None)
}

/// `len` random operations on values below `bound`; `push_ratio` is the chance of a push.
pub fn random_operations(len: usize, push_ratio: f64, bound: u64) -> Vec<Operation<u64>> {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            if rng.gen_bool(push_ratio) {
                Operation::Push(rng.gen_range(0..bound))
            } else {
                Operation::Pop
            }
        })
        .collect()
}
