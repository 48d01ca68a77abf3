use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    Login,
    MakeTransaction,
    GetData,
    SetData,
    GetBalance,
    SubtractBalance,
    CheckBalance,
    GetLedgerBalance,
    ReconcileBalance,
    GetHistory,
    GetReceiveHistory,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::Register,
        Operation::Login,
        Operation::MakeTransaction,
        Operation::GetData,
        Operation::SetData,
        Operation::GetBalance,
        Operation::SubtractBalance,
        Operation::CheckBalance,
        Operation::GetLedgerBalance,
        Operation::ReconcileBalance,
        Operation::GetHistory,
        Operation::GetReceiveHistory,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Register => "register",
            Operation::Login => "login",
            Operation::MakeTransaction => "makeTransaction",
            Operation::GetData => "getData",
            Operation::SetData => "setData",
            Operation::GetBalance => "getBalance",
            Operation::SubtractBalance => "subtractBalance",
            Operation::CheckBalance => "checkBalance",
            Operation::GetLedgerBalance => "getLedgerBalance",
            Operation::ReconcileBalance => "reconcileBalance",
            Operation::GetHistory => "getHistory",
            Operation::GetReceiveHistory => "getReceiveHistory",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Operation::Register | Operation::MakeTransaction => 3,
            Operation::Login | Operation::SetData => 2,
            Operation::GetData
            | Operation::GetBalance
            | Operation::SubtractBalance
            | Operation::CheckBalance
            | Operation::GetLedgerBalance
            | Operation::ReconcileBalance
            | Operation::GetHistory
            | Operation::GetReceiveHistory => 1,
        }
    }
}

impl FromStr for Operation {
    type Err = CommandError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        // `getDataFromArgs` is the older spelling of `getData`
        if name == "getDataFromArgs" {
            return Ok(Operation::GetData);
        }
        Operation::ALL
            .into_iter()
            .find(|operation| operation.name() == name)
            .ok_or_else(|| CommandError::UnknownOperation {
                name: name.to_string(),
            })
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown operation `{name}`")]
    UnknownOperation { name: String },
    #[error("Incorrect number of arguments for {operation:?}: expected {expected}, given {given}")]
    InvalidArgumentCount {
        operation: Operation,
        expected: usize,
        given: usize,
    },
    #[error("Invalid {argument} for {operation:?}: `{value}` ({reason})")]
    InvalidArgument {
        operation: Operation,
        argument: &'static str,
        value: String,
        reason: String,
    },
}

/// A fully parsed invocation, arguments already converted to their types.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Register {
        name: String,
        email: String,
        password: String,
    },
    Login {
        email: String,
        password: String,
    },
    MakeTransaction {
        sender_email: String,
        receiver_email: String,
        amount: Decimal,
    },
    GetData {
        key: String,
    },
    SetData {
        key: String,
        value: String,
    },
    GetBalance {
        email: String,
    },
    SubtractBalance {
        email: String,
    },
    CheckBalance {
        email: String,
    },
    GetLedgerBalance {
        email: String,
    },
    ReconcileBalance {
        email: String,
    },
    GetHistory {
        email: String,
    },
    GetReceiveHistory {
        user_key: String,
    },
}

impl Command {
    pub fn parse(operation: Operation, args: &[String]) -> Result<Self, CommandError> {
        if args.len() != operation.arity() {
            return Err(CommandError::InvalidArgumentCount {
                operation,
                expected: operation.arity(),
                given: args.len(),
            });
        }
        let command = match operation {
            Operation::Register => {
                let [name, email, password] = Self::args::<3>(operation, args)?;
                Command::Register {
                    name: name.clone(),
                    email: email.clone(),
                    password: password.clone(),
                }
            }
            Operation::Login => {
                let [email, password] = Self::args::<2>(operation, args)?;
                Command::Login {
                    email: email.clone(),
                    password: password.clone(),
                }
            }
            Operation::MakeTransaction => {
                let [sender, receiver, amount] = Self::args::<3>(operation, args)?;
                Command::MakeTransaction {
                    sender_email: sender.clone(),
                    receiver_email: receiver.clone(),
                    amount: Self::parse_amount(operation, amount)?,
                }
            }
            Operation::GetData => {
                let [key] = Self::args::<1>(operation, args)?;
                Command::GetData { key: key.clone() }
            }
            Operation::SetData => {
                let [key, value] = Self::args::<2>(operation, args)?;
                Command::SetData {
                    key: key.clone(),
                    value: value.clone(),
                }
            }
            Operation::GetBalance => Command::GetBalance {
                email: Self::single(operation, args)?,
            },
            Operation::SubtractBalance => Command::SubtractBalance {
                email: Self::single(operation, args)?,
            },
            Operation::CheckBalance => Command::CheckBalance {
                email: Self::single(operation, args)?,
            },
            Operation::GetLedgerBalance => Command::GetLedgerBalance {
                email: Self::single(operation, args)?,
            },
            Operation::ReconcileBalance => Command::ReconcileBalance {
                email: Self::single(operation, args)?,
            },
            Operation::GetHistory => Command::GetHistory {
                email: Self::single(operation, args)?,
            },
            Operation::GetReceiveHistory => Command::GetReceiveHistory {
                user_key: Self::single(operation, args)?,
            },
        };
        Ok(command)
    }

    pub fn operation(&self) -> Operation {
        match self {
            Command::Register { .. } => Operation::Register,
            Command::Login { .. } => Operation::Login,
            Command::MakeTransaction { .. } => Operation::MakeTransaction,
            Command::GetData { .. } => Operation::GetData,
            Command::SetData { .. } => Operation::SetData,
            Command::GetBalance { .. } => Operation::GetBalance,
            Command::SubtractBalance { .. } => Operation::SubtractBalance,
            Command::CheckBalance { .. } => Operation::CheckBalance,
            Command::GetLedgerBalance { .. } => Operation::GetLedgerBalance,
            Command::ReconcileBalance { .. } => Operation::ReconcileBalance,
            Command::GetHistory { .. } => Operation::GetHistory,
            Command::GetReceiveHistory { .. } => Operation::GetReceiveHistory,
        }
    }

    fn args<'a, const N: usize>(
        operation: Operation,
        args: &'a [String],
    ) -> Result<&'a [String; N], CommandError> {
        args.try_into()
            .map_err(|_| CommandError::InvalidArgumentCount {
                operation,
                expected: N,
                given: args.len(),
            })
    }

    fn single(operation: Operation, args: &[String]) -> Result<String, CommandError> {
        let [value] = Self::args::<1>(operation, args)?;
        Ok(value.clone())
    }

    /// Plain decimal notation only: optional sign, digits, optional fraction.
    fn parse_amount(operation: Operation, value: &str) -> Result<Decimal, CommandError> {
        let invalid = |reason: String| CommandError::InvalidArgument {
            operation,
            argument: "amount",
            value: value.to_string(),
            reason,
        };
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+')))
        {
            return Err(invalid(format!("unexpected character `{c}`")));
        }
        Decimal::from_str(value).map_err(|err| invalid(err.to_string()))
    }
}
