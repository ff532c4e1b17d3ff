// Per-module containers for the four swerve modules
//
// Modules are always stored in the canonical order
// front-left, front-right, rear-right, rear-left.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// One of the four independently driven and steered wheel assemblies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleIndex {
    FrontLeft,
    FrontRight,
    RearRight,
    RearLeft,
}

impl ModuleIndex {
    /// All modules in canonical order
    pub const ALL: [ModuleIndex; 4] = [
        ModuleIndex::FrontLeft,
        ModuleIndex::FrontRight,
        ModuleIndex::RearRight,
        ModuleIndex::RearLeft,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModuleIndex::FrontLeft => "front_left",
            ModuleIndex::FrontRight => "front_right",
            ModuleIndex::RearRight => "rear_right",
            ModuleIndex::RearLeft => "rear_left",
        }
    }
}

/// One value per module
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleSet<T> {
    pub front_left: T,
    pub front_right: T,
    pub rear_right: T,
    pub rear_left: T,
}

impl<T> ModuleSet<T> {
    pub fn new(front_left: T, front_right: T, rear_right: T, rear_left: T) -> Self {
        Self {
            front_left,
            front_right,
            rear_right,
            rear_left,
        }
    }

    /// Build a set by evaluating `f` for each module in canonical order
    pub fn from_fn(mut f: impl FnMut(ModuleIndex) -> T) -> Self {
        Self {
            front_left: f(ModuleIndex::FrontLeft),
            front_right: f(ModuleIndex::FrontRight),
            rear_right: f(ModuleIndex::RearRight),
            rear_left: f(ModuleIndex::RearLeft),
        }
    }

    /// Like `from_fn`, stopping at the first error
    pub fn try_from_fn<E>(mut f: impl FnMut(ModuleIndex) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self {
            front_left: f(ModuleIndex::FrontLeft)?,
            front_right: f(ModuleIndex::FrontRight)?,
            rear_right: f(ModuleIndex::RearRight)?,
            rear_left: f(ModuleIndex::RearLeft)?,
        })
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ModuleSet<U> {
        ModuleSet {
            front_left: f(self.front_left),
            front_right: f(self.front_right),
            rear_right: f(self.rear_right),
            rear_left: f(self.rear_left),
        }
    }

    /// Iterate `(module, value)` pairs in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (ModuleIndex, &T)> {
        ModuleIndex::ALL.into_iter().map(move |m| (m, &self[m]))
    }
}

impl<T: Copy> ModuleSet<T> {
    pub fn splat(value: T) -> Self {
        Self::new(value, value, value, value)
    }
}

impl<T> Index<ModuleIndex> for ModuleSet<T> {
    type Output = T;

    fn index(&self, module: ModuleIndex) -> &T {
        match module {
            ModuleIndex::FrontLeft => &self.front_left,
            ModuleIndex::FrontRight => &self.front_right,
            ModuleIndex::RearRight => &self.rear_right,
            ModuleIndex::RearLeft => &self.rear_left,
        }
    }
}

impl<T> IndexMut<ModuleIndex> for ModuleSet<T> {
    fn index_mut(&mut self, module: ModuleIndex) -> &mut T {
        match module {
            ModuleIndex::FrontLeft => &mut self.front_left,
            ModuleIndex::FrontRight => &mut self.front_right,
            ModuleIndex::RearRight => &mut self.rear_right,
            ModuleIndex::RearLeft => &mut self.rear_left,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let set = ModuleSet::from_fn(|m| m);
        let order: Vec<ModuleIndex> = set.iter().map(|(_, &v)| v).collect();
        assert_eq!(order, ModuleIndex::ALL.to_vec());
    }

    #[test]
    fn test_try_from_fn_stops_at_error() {
        let mut visited = Vec::new();
        let result: Result<ModuleSet<u8>, &str> = ModuleSet::try_from_fn(|m| {
            visited.push(m);
            if m == ModuleIndex::FrontRight {
                Err("unreachable module")
            } else {
                Ok(1)
            }
        });
        assert!(result.is_err());
        assert_eq!(visited, vec![ModuleIndex::FrontLeft, ModuleIndex::FrontRight]);
    }
}
