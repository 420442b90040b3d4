use crate::types::Chatroom;

/// Result of applying a create response to the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The chatroom was new and has been appended.
    Inserted(Chatroom),
    /// A chatroom with that id was already listed; the list is unchanged.
    Existing(Chatroom),
}

impl CreateOutcome {
    pub fn chatroom(&self) -> &Chatroom {
        match self {
            Self::Inserted(chatroom) | Self::Existing(chatroom) => chatroom,
        }
    }
}

/// Ordered chatrooms of the signed-in user.
#[derive(Debug, Clone, Default)]
pub struct ChatroomListStore {
    chatrooms: Vec<Chatroom>,
    generation: u64,
    in_flight: Option<u64>,
    load_error: Option<String>,
    create_error: Option<String>,
}

impl ChatroomListStore {
    pub fn chatrooms(&self) -> &[Chatroom] {
        &self.chatrooms
    }

    pub fn get(&self, chatroom_id: &str) -> Option<&Chatroom> {
        self.chatrooms.iter().find(|chatroom| chatroom.id == chatroom_id)
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn create_error(&self) -> Option<&str> {
        self.create_error.as_deref()
    }

    /// Start a list load; only the newest generation is applied.
    pub fn begin_load(&mut self) -> u64 {
        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.generation
    }

    /// Apply a list load result. Returns `false` when `generation` is stale.
    ///
    /// Failures keep the previous chatrooms and only set the load error.
    pub fn finish_load(&mut self, generation: u64, result: Result<Vec<Chatroom>, String>) -> bool {
        if self.in_flight != Some(generation) {
            return false;
        }
        self.in_flight = None;

        match result {
            Ok(chatrooms) => {
                self.chatrooms = chatrooms;
                self.load_error = None;
            }
            Err(message) => self.load_error = Some(message),
        }
        true
    }

    /// Existing two-member chatroom between `own_user_id` and `contact_id`.
    pub fn find_direct_with(&self, own_user_id: &str, contact_id: &str) -> Option<&Chatroom> {
        self.chatrooms
            .iter()
            .find(|chatroom| chatroom.is_direct_between(own_user_id, contact_id))
    }

    /// Apply a successful create response, deduplicating by id.
    pub fn apply_created(&mut self, chatroom: Chatroom) -> CreateOutcome {
        self.create_error = None;
        if let Some(existing) = self.get(&chatroom.id) {
            return CreateOutcome::Existing(existing.clone());
        }

        self.chatrooms.push(chatroom.clone());
        CreateOutcome::Inserted(chatroom)
    }

    pub fn fail_create(&mut self, message: impl Into<String>) {
        self.create_error = Some(message.into());
    }

    pub fn clear_create_error(&mut self) {
        self.create_error = None;
    }

    /// Drop everything and invalidate any in-flight load.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.chatrooms.clear();
        self.in_flight = None;
        self.load_error = None;
        self.create_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Member;

    fn direct(id: &str, own: &str, other: &str) -> Chatroom {
        Chatroom {
            id: id.to_owned(),
            name: None,
            members: [own, other]
                .into_iter()
                .map(|user_id| Member {
                    user_id: user_id.to_owned(),
                    display_name: None,
                    email: None,
                    profile_pic_url: None,
                })
                .collect(),
            last_message: None,
            picture_url: None,
        }
    }

    #[test]
    fn load_replaces_list_on_success() {
        let mut store = ChatroomListStore::default();
        let generation = store.begin_load();
        assert!(store.is_loading());

        assert!(store.finish_load(generation, Ok(vec![direct("r1", "alice", "bob")])));
        assert_eq!(store.chatrooms().len(), 1);
        assert!(!store.is_loading());
    }

    #[test]
    fn failed_load_keeps_previous_list() {
        let mut store = ChatroomListStore::default();
        let generation = store.begin_load();
        store.finish_load(generation, Ok(vec![direct("r1", "alice", "bob")]));

        let generation = store.begin_load();
        store.finish_load(generation, Err("Failed to fetch chatrooms".into()));
        assert_eq!(store.chatrooms().len(), 1);
        assert_eq!(store.load_error(), Some("Failed to fetch chatrooms"));
    }

    #[test]
    fn ignores_superseded_load() {
        let mut store = ChatroomListStore::default();
        let stale = store.begin_load();
        let current = store.begin_load();

        assert!(store.finish_load(current, Ok(vec![direct("r2", "alice", "carol")])));
        assert!(!store.finish_load(stale, Ok(vec![direct("r1", "alice", "bob")])));
        assert_eq!(store.chatrooms()[0].id, "r2");
    }

    #[test]
    fn create_for_existing_chatroom_keeps_length() {
        let mut store = ChatroomListStore::default();
        let generation = store.begin_load();
        store.finish_load(generation, Ok(vec![direct("r1", "alice", "bob")]));

        let found = store
            .find_direct_with("alice", "bob")
            .expect("direct chat with bob exists")
            .clone();
        let outcome = store.apply_created(found);
        assert!(matches!(outcome, CreateOutcome::Existing(ref room) if room.id == "r1"));
        assert_eq!(store.chatrooms().len(), 1);
    }

    #[test]
    fn create_appends_new_chatroom() {
        let mut store = ChatroomListStore::default();
        store.fail_create("Failed to create chatroom");

        let outcome = store.apply_created(direct("r9", "alice", "dave"));
        assert_eq!(outcome.chatroom().id, "r9");
        assert!(matches!(outcome, CreateOutcome::Inserted(_)));
        assert_eq!(store.chatrooms().len(), 1);
        assert_eq!(store.create_error(), None);
    }

    #[test]
    fn clear_invalidates_in_flight_load() {
        let mut store = ChatroomListStore::default();
        let generation = store.begin_load();
        store.clear();
        assert!(!store.finish_load(generation, Ok(vec![direct("r1", "alice", "bob")])));
        assert!(store.chatrooms().is_empty());
    }
}
