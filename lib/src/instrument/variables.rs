use crate::jvm::code::Instruction;
use crate::jvm::verifier::VerificationType;
use crate::jvm::{BinaryName, Error, FieldType, RefType};
use crate::util::Width;

/// Category of value a scratch variable holds
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Int,
    Long,
    Float,
    Double,
    Object,
}

impl VariableKind {
    pub const ALL: [VariableKind; 5] = [
        VariableKind::Int,
        VariableKind::Long,
        VariableKind::Float,
        VariableKind::Double,
        VariableKind::Object,
    ];

    /// Kind of variable needed to hold a value of the given type
    ///
    /// `Top` and `null` have nothing worth storing.
    pub fn of(typ: &VerificationType) -> Option<VariableKind> {
        match typ {
            VerificationType::Integer => Some(VariableKind::Int),
            VerificationType::Long => Some(VariableKind::Long),
            VerificationType::Float => Some(VariableKind::Float),
            VerificationType::Double => Some(VariableKind::Double),
            VerificationType::Object(_)
            | VerificationType::UninitializedThis
            | VerificationType::Uninitialized(_) => Some(VariableKind::Object),
            VerificationType::Top | VerificationType::Null => None,
        }
    }

    pub fn load(self, slot: u16) -> Instruction {
        match self {
            VariableKind::Int => Instruction::ILoad(slot),
            VariableKind::Long => Instruction::LLoad(slot),
            VariableKind::Float => Instruction::FLoad(slot),
            VariableKind::Double => Instruction::DLoad(slot),
            VariableKind::Object => Instruction::ALoad(slot),
        }
    }

    pub fn store(self, slot: u16) -> Instruction {
        match self {
            VariableKind::Int => Instruction::IStore(slot),
            VariableKind::Long => Instruction::LStore(slot),
            VariableKind::Float => Instruction::FStore(slot),
            VariableKind::Double => Instruction::DStore(slot),
            VariableKind::Object => Instruction::AStore(slot),
        }
    }

    /// Load from an array of this kind
    pub fn array_load(self) -> Instruction {
        match self {
            VariableKind::Int => Instruction::IALoad,
            VariableKind::Long => Instruction::LALoad,
            VariableKind::Float => Instruction::FALoad,
            VariableKind::Double => Instruction::DALoad,
            VariableKind::Object => Instruction::AALoad,
        }
    }

    /// Store into an array of this kind
    pub fn array_store(self) -> Instruction {
        match self {
            VariableKind::Int => Instruction::IAStore,
            VariableKind::Long => Instruction::LAStore,
            VariableKind::Float => Instruction::FAStore,
            VariableKind::Double => Instruction::DAStore,
            VariableKind::Object => Instruction::AAStore,
        }
    }

    /// Type of the elements of saved frame arrays of this kind
    pub fn element_type(self) -> FieldType {
        match self {
            VariableKind::Int => FieldType::int(),
            VariableKind::Long => FieldType::long(),
            VariableKind::Float => FieldType::float(),
            VariableKind::Double => FieldType::double(),
            VariableKind::Object => FieldType::object(BinaryName::OBJECT),
        }
    }

    /// Type of saved frame arrays of this kind
    pub fn array_type(self) -> RefType {
        RefType::array(self.element_type())
    }
}

impl Width for VariableKind {
    fn width(&self) -> usize {
        match self {
            VariableKind::Long | VariableKind::Double => 2,
            _ => 1,
        }
    }
}

/// Lease on a scratch local variable
///
/// Tickets can't be copied: once a ticket is given back with [`VariableTable::release`], there is
/// no way to keep using it. Re-acquiring a variable produces a new ticket (with a new generation)
/// even if the slot is the same.
#[derive(Debug, PartialEq, Eq)]
pub struct Ticket {
    slot: u16,
    kind: VariableKind,
    generation: u64,
}

impl Ticket {
    pub fn slot(&self) -> u16 {
        self.slot
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn load(&self) -> Instruction {
        self.kind.load(self.slot)
    }

    pub fn store(&self) -> Instruction {
        self.kind.store(self.slot)
    }
}

/// Scratch local variables, allocated after the locals of the original code
#[derive(Debug)]
pub struct VariableTable {
    next_slot: u16,
    free_narrow: Vec<u16>,
    free_wide: Vec<u16>,
    generation: u64,
}

impl VariableTable {
    /// Allocate variables starting at the given slot
    pub fn new(first_slot: u16) -> VariableTable {
        VariableTable {
            next_slot: first_slot,
            free_narrow: vec![],
            free_wide: vec![],
            generation: 0,
        }
    }

    pub fn acquire(&mut self, kind: VariableKind) -> Result<Ticket, Error> {
        let free = if kind.width() == 2 {
            &mut self.free_wide
        } else {
            &mut self.free_narrow
        };
        let slot = match free.pop() {
            Some(slot) => slot,
            None => {
                let slot = self.next_slot;
                self.next_slot = u16::try_from(kind.width())
                    .ok()
                    .and_then(|width| slot.checked_add(width))
                    .ok_or_else(|| {
                        Error::Unanalyzable(String::from("too many local variables"))
                    })?;
                slot
            }
        };
        self.generation += 1;
        Ok(Ticket {
            slot,
            kind,
            generation: self.generation,
        })
    }

    pub fn release(&mut self, ticket: Ticket) {
        if ticket.kind.width() == 2 {
            self.free_wide.push(ticket.slot);
        } else {
            self.free_narrow.push(ticket.slot);
        }
    }

    /// First slot never handed out
    pub fn max_locals(&self) -> u16 {
        self.next_slot
    }
}
