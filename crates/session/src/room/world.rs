use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SeatMap;

pub type ObjectId = String;

/// Dynamic object fields (position components plus custom flags such as
/// `broken`). Updates are shallow: a key absent from an update keeps its value.
pub type ObjectState = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    #[serde(default = "identity_rotation")]
    pub rotation: Quat,
}

fn identity_rotation() -> Quat {
    Quat::IDENTITY
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hole {
    pub x: f32,
    pub z: f32,
    pub filled: bool,
}

/// Static layout fixed at room creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub spawn_points: SeatMap<Vec3>,
    pub blocks: BTreeMap<ObjectId, Vec3>,
    pub holes: BTreeMap<String, Hole>,
}

impl Default for World {
    fn default() -> Self {
        let mut blocks = BTreeMap::new();
        blocks.insert("block_1".to_string(), Vec3::new(0.0, 0.5, -2.0));
        blocks.insert("block_2".to_string(), Vec3::new(3.0, 0.5, -1.0));

        let mut holes = BTreeMap::new();
        holes.insert(
            "hole_A".to_string(),
            Hole {
                x: 0.0,
                z: -4.0,
                filled: false,
            },
        );
        holes.insert(
            "hole_B".to_string(),
            Hole {
                x: 4.0,
                z: -3.0,
                filled: false,
            },
        );

        Self {
            spawn_points: SeatMap::new(Vec3::new(-2.0, 0.5, 0.0), Vec3::new(2.0, 0.5, 0.0)),
            blocks,
            holes,
        }
    }
}

impl World {
    pub fn initial_objects(&self) -> BTreeMap<ObjectId, ObjectState> {
        self.blocks
            .iter()
            .map(|(id, pos)| (id.clone(), position_state(*pos)))
            .collect()
    }

    pub fn spawn_transforms(&self) -> SeatMap<Transform> {
        SeatMap::new(
            Transform::at(self.spawn_points.host),
            Transform::at(self.spawn_points.client),
        )
    }
}

pub fn position_state(position: Vec3) -> ObjectState {
    let mut state = Map::new();
    state.insert("x".to_string(), Value::from(position.x));
    state.insert("y".to_string(), Value::from(position.y));
    state.insert("z".to_string(), Value::from(position.z));
    state
}

pub fn merge_state(target: &mut ObjectState, partial: &ObjectState) {
    for (key, value) in partial {
        target.insert(key.clone(), value.clone());
    }
}
