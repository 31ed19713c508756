use std::{collections::HashSet, sync::Arc};

use crate::{
    change_unit::ChangeUnit,
    error::{MigrateError, Result},
};

/// Working set of change units collected at process start.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    units: Vec<ChangeUnit>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, unit: ChangeUnit) -> Result<()> {
        if unit.id().is_empty() {
            return Err(MigrateError::InvalidChangeUnit(
                "change unit id must not be empty".to_owned(),
            ));
        }

        if unit.order().is_empty() {
            return Err(MigrateError::InvalidChangeUnit(format!(
                "change unit `{}` has an empty order",
                unit.id()
            )));
        }

        if !unit.has_execution() {
            return Err(MigrateError::InvalidChangeUnit(format!(
                "change unit `{}` has no execution",
                unit.id()
            )));
        }

        if self.units.iter().any(|u| u.id() == unit.id()) {
            return Err(MigrateError::DuplicateChangeUnit {
                field: "id",
                value: unit.id().to_owned(),
            });
        }

        if self.units.iter().any(|u| u.order() == unit.order()) {
            return Err(MigrateError::DuplicateChangeUnit {
                field: "order",
                value: unit.order().to_owned(),
            });
        }

        self.units.push(unit);

        Ok(())
    }

    pub fn with(mut self, unit: ChangeUnit) -> Result<Self> {
        self.register(unit)?;

        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn plan(&self) -> Plan {
        let mut units = self.units.clone();
        units.sort_by(|a, b| a.order().cmp(b.order()));

        Plan(Arc::new(units))
    }
}

/// Registered change units sorted by ascending order. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Plan(Arc<Vec<ChangeUnit>>);

impl Plan {
    pub fn iter(&self) -> impl Iterator<Item = &ChangeUnit> {
        self.0.iter()
    }

    pub fn get(&self, id: &str) -> Option<&ChangeUnit> {
        self.0.iter().find(|unit| unit.id() == id)
    }

    pub fn ids(&self) -> HashSet<&str> {
        self.0.iter().map(|unit| unit.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
