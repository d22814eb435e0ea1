use std::sync::Arc;

use crate::form::{FormController, FormMode, FormModel, FormResult};

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SelectionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// What the create/edit surface currently shows.
#[derive(Debug)]
pub enum DrawerState<T> {
    Closed,
    Creating,
    Editing(Arc<T>),
}

impl<T> Clone for DrawerState<T> {
    fn clone(&self) -> Self {
        match self {
            DrawerState::Closed => DrawerState::Closed,
            DrawerState::Creating => DrawerState::Creating,
            DrawerState::Editing(item) => DrawerState::Editing(item.clone()),
        }
    }
}

/// Tracks whether the drawer is open and which record, if any, it edits.
#[derive(Debug)]
pub struct SelectionState<T> {
    drawer: DrawerState<T>,
}

impl<T> Default for SelectionState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SelectionState<T> {
    pub fn new() -> Self {
        Self {
            drawer: DrawerState::Closed,
        }
    }

    pub fn drawer(&self) -> &DrawerState<T> {
        &self.drawer
    }

    pub fn open_for_create(&mut self) {
        self.drawer = DrawerState::Creating;
        tracing::debug!("drawer opened for create");
    }

    /// Opens the drawer on `item`. Without an item nothing changes.
    pub fn open_for_edit(&mut self, item: Option<Arc<T>>) -> Result<(), SelectionError> {
        let item = item.ok_or(SelectionError::InvalidArgument(
            "open_for_edit requires an item",
        ))?;
        self.drawer = DrawerState::Editing(item);
        tracing::debug!("drawer opened for edit");
        Ok(())
    }

    /// Closes the drawer and drops the selection. Returns whether it was open.
    pub fn close(&mut self) -> bool {
        let was_open = self.is_open();
        self.drawer = DrawerState::Closed;
        if was_open {
            tracing::debug!("drawer closed");
        }
        was_open
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.drawer, DrawerState::Closed)
    }

    pub fn selected(&self) -> Option<&Arc<T>> {
        match &self.drawer {
            DrawerState::Editing(item) => Some(item),
            _ => None,
        }
    }

    pub fn mode(&self) -> Option<FormMode> {
        match self.drawer {
            DrawerState::Closed => None,
            DrawerState::Creating => Some(FormMode::Create),
            DrawerState::Editing(_) => Some(FormMode::Edit),
        }
    }
}

impl<T: FormModel> SelectionState<T> {
    /// Points `form` at the selected record. Returns whether the form was reseeded.
    pub fn sync_form(&self, form: &FormController<T>) -> FormResult<bool> {
        form.set_item(self.selected().cloned())
    }
}
