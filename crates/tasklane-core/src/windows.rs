//! Copy-on-write operations over the
//! ordered window collection.
//!
//! Every function takes the current
//! collection by reference and hands
//! back a fresh one, so a view holding
//! the old slice never observes the
//! mutation. `None` means the referenced
//! window or task no longer exists.

use chrono::{
  DateTime,
  Utc
};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
  ListWindow,
  Task
};

pub fn default_title(
  count: usize
) -> String {
  format!("List {}", count + 1)
}

pub fn find(
  windows: &[ListWindow],
  id: Uuid
) -> Option<&ListWindow> {
  windows.iter().find(|win| win.id == id)
}

#[tracing::instrument(skip(
  windows, now
))]
pub fn create_window(
  windows: &[ListWindow],
  now: DateTime<Utc>
) -> (Vec<ListWindow>, Uuid) {
  let window = ListWindow::new(
    default_title(windows.len()),
    now
  );
  let id = window.id;
  let mut next = windows.to_vec();
  next.push(window);
  debug!(%id, count = next.len(), "window created");
  (next, id)
}

/// Rejects removal when it would leave
/// no window. `pending` counts windows
/// whose removal is already scheduled.
pub fn ensure_removable(
  windows: &[ListWindow],
  pending: usize
) -> Result<(), StoreError> {
  if windows.len().saturating_sub(pending)
    <= 1
  {
    return Err(StoreError::LastWindow);
  }
  Ok(())
}

#[tracing::instrument(skip(windows))]
pub fn remove_window(
  windows: &[ListWindow],
  id: Uuid
) -> Result<Option<Vec<ListWindow>>, StoreError>
{
  if find(windows, id).is_none() {
    return Ok(None);
  }
  ensure_removable(windows, 0)?;
  Ok(Some(
    windows
      .iter()
      .filter(|win| win.id != id)
      .cloned()
      .collect()
  ))
}

#[tracing::instrument(skip(windows))]
pub fn rename_window(
  windows: &[ListWindow],
  id: Uuid,
  title: &str
) -> Result<Option<Vec<ListWindow>>, StoreError>
{
  let title = title.trim();
  if title.is_empty() {
    return Err(StoreError::EmptyTitle);
  }
  Ok(map_window(windows, id, |win| {
    ListWindow {
      title: title.to_string(),
      ..win.clone()
    }
  }))
}

#[tracing::instrument(skip(
  windows, text, now
))]
pub fn add_task(
  windows: &[ListWindow],
  id: Uuid,
  text: &str,
  now: DateTime<Utc>
) -> Result<
  Option<(Vec<ListWindow>, Uuid)>,
  StoreError
> {
  let text = text.trim();
  if text.is_empty() {
    return Err(StoreError::EmptyTaskText);
  }

  let task =
    Task::new(text.to_string(), now);
  let task_id = task.id;
  let next =
    map_window(windows, id, |win| {
      let mut tasks = win.tasks.clone();
      tasks.push(task.clone());
      ListWindow {
        tasks,
        ..win.clone()
      }
    });
  Ok(next.map(|next| (next, task_id)))
}

#[tracing::instrument(skip(windows))]
pub fn toggle_task(
  windows: &[ListWindow],
  id: Uuid,
  task_id: Uuid
) -> Option<Vec<ListWindow>> {
  find(windows, id)?.task(task_id)?;
  map_window(windows, id, |win| {
    ListWindow {
      tasks: win
        .tasks
        .iter()
        .map(|task| {
          if task.id == task_id {
            Task {
              completed: !task.completed,
              ..task.clone()
            }
          } else {
            task.clone()
          }
        })
        .collect(),
      ..win.clone()
    }
  })
}

#[tracing::instrument(skip(windows))]
pub fn remove_task(
  windows: &[ListWindow],
  id: Uuid,
  task_id: Uuid
) -> Option<Vec<ListWindow>> {
  find(windows, id)?.task(task_id)?;
  map_window(windows, id, |win| {
    ListWindow {
      tasks: win
        .tasks
        .iter()
        .filter(|task| task.id != task_id)
        .cloned()
        .collect(),
      ..win.clone()
    }
  })
}

#[tracing::instrument(skip(windows))]
pub fn reset_tasks(
  windows: &[ListWindow],
  id: Uuid
) -> Option<Vec<ListWindow>> {
  map_window(windows, id, |win| {
    ListWindow {
      tasks: win
        .tasks
        .iter()
        .map(|task| Task {
          completed: false,
          ..task.clone()
        })
        .collect(),
      ..win.clone()
    }
  })
}

fn map_window<F>(
  windows: &[ListWindow],
  id: Uuid,
  update: F
) -> Option<Vec<ListWindow>>
where
  F: Fn(&ListWindow) -> ListWindow
{
  find(windows, id)?;
  Some(
    windows
      .iter()
      .map(|win| {
        if win.id == id {
          update(win)
        } else {
          win.clone()
        }
      })
      .collect()
  )
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use uuid::Uuid;

  use super::{
    add_task,
    create_window,
    remove_task,
    remove_window,
    rename_window,
    reset_tasks,
    toggle_task
  };
  use crate::error::StoreError;
  use crate::model::ListWindow;

  fn one_window() -> (Vec<ListWindow>, Uuid)
  {
    create_window(&[], Utc::now())
  }

  #[test]
  fn new_windows_are_numbered_after_the_count()
  {
    let (windows, _) = one_window();
    let (windows, id) =
      create_window(&windows, Utc::now());
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0].title, "List 1");
    assert_eq!(windows[1].title, "List 2");
    assert_eq!(windows[1].id, id);
  }

  #[test]
  fn last_window_cannot_be_removed() {
    let (windows, id) = one_window();
    assert_eq!(
      remove_window(&windows, id),
      Err(StoreError::LastWindow)
    );

    let (windows, second) =
      create_window(&windows, Utc::now());
    let next = remove_window(&windows, id)
      .unwrap()
      .unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].id, second);
  }

  #[test]
  fn blank_task_text_never_mutates() {
    let (windows, id) = one_window();
    for text in ["", "   ", "\t\n"] {
      assert_eq!(
        add_task(
          &windows,
          id,
          text,
          Utc::now()
        ),
        Err(StoreError::EmptyTaskText)
      );
    }
    assert!(windows[0].tasks.is_empty());
  }

  #[test]
  fn add_task_trims_and_copies() {
    let (windows, id) = one_window();
    let (next, task_id) = add_task(
      &windows,
      id,
      "  Buy milk ",
      Utc::now()
    )
    .unwrap()
    .unwrap();

    assert!(windows[0].tasks.is_empty());
    let task =
      next[0].task(task_id).unwrap();
    assert_eq!(task.text, "Buy milk");
    assert!(!task.completed);
  }

  #[test]
  fn toggle_is_an_involution() {
    let (windows, id) = one_window();
    let (windows, task_id) = add_task(
      &windows,
      id,
      "x",
      Utc::now()
    )
    .unwrap()
    .unwrap();

    let once =
      toggle_task(&windows, id, task_id)
        .unwrap();
    assert!(
      once[0].task(task_id).unwrap().completed
    );
    let twice =
      toggle_task(&once, id, task_id)
        .unwrap();
    assert_eq!(twice, windows);
  }

  #[test]
  fn stale_ids_are_not_found() {
    let (windows, id) = one_window();
    let missing = Uuid::new_v4();
    assert!(
      toggle_task(&windows, id, missing)
        .is_none()
    );
    assert!(
      remove_task(&windows, missing, missing)
        .is_none()
    );
    assert!(
      reset_tasks(&windows, missing).is_none()
    );
    assert_eq!(
      rename_window(&windows, missing, "x"),
      Ok(None)
    );
  }

  #[test]
  fn rename_rejects_blank_and_trims() {
    let (windows, id) = one_window();
    assert_eq!(
      rename_window(&windows, id, "  "),
      Err(StoreError::EmptyTitle)
    );
    let next =
      rename_window(&windows, id, " Chores ")
        .unwrap()
        .unwrap();
    assert_eq!(next[0].title, "Chores");
  }

  #[test]
  fn reset_clears_every_flag() {
    let (mut windows, id) = one_window();
    for text in ["a", "b"] {
      let (next, task_id) = add_task(
        &windows,
        id,
        text,
        Utc::now()
      )
      .unwrap()
      .unwrap();
      windows =
        toggle_task(&next, id, task_id)
          .unwrap();
    }
    assert_eq!(windows[0].stats().completed, 2);

    let reset =
      reset_tasks(&windows, id).unwrap();
    assert_eq!(reset[0].stats().completed, 0);
    assert_eq!(reset[0].stats().total, 2);
  }
}
