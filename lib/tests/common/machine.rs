//! Tiny interpreter for the subset of bytecode the tests produce
//!
//! Good enough to run woven classes and the closures synthesized for them. Unwoven classes can be
//! run too, with factory calls evaluated eagerly: `supply(v)` becomes a supplier of `v`. That only
//! agrees with the woven code when the closure body has no side effects.

use closureweave::jvm::class_file::ClassFile;
use closureweave::jvm::code::{Instruction, InvokeType, MethodUnit, OrdComparison};
use closureweave::jvm::{
    BaseType, BinaryName, FieldType, MethodDescriptor, Name, RefType, UnqualifiedName,
};
use closureweave::weave::WeaveOutput;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Long(i64),
    Null,
    Ref(Rc<RefCell<Object>>),
}

#[derive(Debug)]
pub enum Object {
    Instance {
        class: BinaryName,
        fields: HashMap<String, Value>,
    },
    Array(Vec<Value>),

    /// Result of an eagerly evaluated factory
    Constant(Value),
}

impl Value {
    pub fn int(&self) -> i32 {
        match self {
            Value::Int(i) => *i,
            other => panic!("expected an int, found {:?}", other),
        }
    }

    fn object(&self) -> Rc<RefCell<Object>> {
        match self {
            Value::Ref(object) => object.clone(),
            other => panic!("expected a reference, found {:?}", other),
        }
    }

    fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_))
    }

    fn default_for(field_type: &FieldType) -> Value {
        match field_type {
            FieldType::Base(BaseType::Long) => Value::Long(0),
            FieldType::Base(_) => Value::Int(0),
            FieldType::Ref(_) => Value::Null,
        }
    }
}

pub struct Machine {
    classes: HashMap<BinaryName, ClassFile>,
    statics: HashMap<(String, String), Value>,

    /// Run factory calls instead of expecting them to have been woven away
    eager_factories: bool,

    /// Instructions executed so far
    pub steps: usize,
}

impl Machine {
    pub fn new() -> Machine {
        Machine {
            classes: HashMap::new(),
            statics: HashMap::new(),
            eager_factories: false,
            steps: 0,
        }
    }

    /// Machine for running classes that still contain factory calls
    pub fn eager() -> Machine {
        Machine {
            eager_factories: true,
            ..Machine::new()
        }
    }

    pub fn load(&mut self, bytes: &[u8]) {
        let class = ClassFile::parse(bytes).unwrap();
        self.classes.insert(class.this_class_name().unwrap(), class);
    }

    pub fn load_output(&mut self, output: &WeaveOutput) {
        self.load(&output.bytes);
        for (_, bytes) in &output.synthesized {
            self.load(bytes);
        }
    }

    /// Call a static method of a loaded class
    pub fn call_static(
        &mut self,
        class: &str,
        method: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Option<Value> {
        use closureweave::jvm::ParseDescriptor;

        let class = BinaryName::from_string(class.to_owned()).unwrap();
        let method = UnqualifiedName::from_string(method.to_owned()).unwrap();
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        let unit = self
            .find_method(&class, &method, &descriptor)
            .unwrap_or_else(|| panic!("no method {}.{}", class, method));
        self.run(&unit, args)
    }

    /// Find a method with code, looking through superclasses
    fn find_method(
        &self,
        class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Option<MethodUnit> {
        let mut current = Some(class.clone());
        while let Some(class_name) = current {
            let class = self.classes.get(&class_name)?;
            for method in &class.methods {
                let (method_name, method_descriptor) = class.method_signature(method).unwrap();
                if &method_name == name && &method_descriptor == descriptor {
                    return MethodUnit::from_class_method(class, method).unwrap();
                }
            }
            current = class.super_class_name().unwrap();
        }
        None
    }

    fn run(&mut self, unit: &MethodUnit, args: Vec<Value>) -> Option<Value> {
        let mut locals = vec![Value::Null; (unit.max_locals as usize).max(2 * args.len())];
        let mut slot = 0;
        for arg in args {
            let width = if arg.is_wide() { 2 } else { 1 };
            locals[slot] = arg;
            slot += width;
        }
        let mut stack: Vec<Value> = vec![];
        let mut pc = 0;

        loop {
            self.steps += 1;
            let insn = &unit.instructions[pc];
            pc += 1;
            match insn {
                Instruction::Nop | Instruction::CheckCast(_) => (),
                Instruction::AConstNull => stack.push(Value::Null),
                Instruction::IConst(i) => stack.push(Value::Int(*i)),
                Instruction::LConst(l) => stack.push(Value::Long(*l)),
                Instruction::Load(_, slot) => stack.push(locals[*slot as usize].clone()),
                Instruction::Store(_, slot) => locals[*slot as usize] = pop(&mut stack),
                Instruction::IInc(slot, by) => {
                    let value = locals[*slot as usize].int();
                    locals[*slot as usize] = Value::Int(value.wrapping_add(*by as i32));
                }
                Instruction::ArrayLoad(_) => {
                    let index = pop(&mut stack).int() as usize;
                    let array = pop(&mut stack).object();
                    let value = match &*array.borrow() {
                        Object::Array(elements) => elements[index].clone(),
                        other => panic!("expected an array, found {:?}", other),
                    };
                    stack.push(value);
                }
                Instruction::ArrayStore(_) => {
                    let value = pop(&mut stack);
                    let index = pop(&mut stack).int() as usize;
                    let array = pop(&mut stack).object();
                    match &mut *array.borrow_mut() {
                        Object::Array(elements) => elements[index] = value,
                        other => panic!("expected an array, found {:?}", other),
                    };
                }
                Instruction::ArrayLength => {
                    let array = pop(&mut stack).object();
                    let length = match &*array.borrow() {
                        Object::Array(elements) => elements.len(),
                        other => panic!("expected an array, found {:?}", other),
                    };
                    stack.push(Value::Int(length as i32));
                }
                Instruction::NewArray(base) => {
                    let length = pop(&mut stack).int() as usize;
                    let element = Value::default_for(&FieldType::Base(*base));
                    stack.push(new_object(Object::Array(vec![element; length])));
                }
                Instruction::ANewArray(_) => {
                    let length = pop(&mut stack).int() as usize;
                    stack.push(new_object(Object::Array(vec![Value::Null; length])));
                }

                Instruction::Pop => {
                    pop(&mut stack);
                }
                Instruction::Pop2 => {
                    if !pop(&mut stack).is_wide() {
                        pop(&mut stack);
                    }
                }
                Instruction::Dup => {
                    let top = pop(&mut stack);
                    stack.push(top.clone());
                    stack.push(top);
                }
                Instruction::DupX1 => {
                    let first = pop(&mut stack);
                    let second = pop(&mut stack);
                    stack.extend([first.clone(), second, first]);
                }
                Instruction::DupX2 => {
                    let first = pop(&mut stack);
                    let second = pop(&mut stack);
                    if second.is_wide() {
                        stack.extend([first.clone(), second, first]);
                    } else {
                        let third = pop(&mut stack);
                        stack.extend([first.clone(), third, second, first]);
                    }
                }
                Instruction::Dup2 => {
                    let first = pop(&mut stack);
                    if first.is_wide() {
                        stack.extend([first.clone(), first]);
                    } else {
                        let second = pop(&mut stack);
                        stack.extend([second.clone(), first.clone(), second, first]);
                    }
                }
                Instruction::Swap => {
                    let first = pop(&mut stack);
                    let second = pop(&mut stack);
                    stack.extend([first, second]);
                }

                Instruction::IAdd => binary(&mut stack, i32::wrapping_add),
                Instruction::ISub => binary(&mut stack, i32::wrapping_sub),
                Instruction::IMul => binary(&mut stack, i32::wrapping_mul),
                Instruction::INeg => {
                    let value = pop(&mut stack).int();
                    stack.push(Value::Int(value.wrapping_neg()));
                }

                Instruction::If(comparison, target) => {
                    if compare(*comparison, pop(&mut stack).int(), 0) {
                        pc = *target;
                    }
                }
                Instruction::IfICmp(comparison, target) => {
                    let right = pop(&mut stack).int();
                    let left = pop(&mut stack).int();
                    if compare(*comparison, left, right) {
                        pc = *target;
                    }
                }
                Instruction::Goto(target) => pc = *target,
                Instruction::Return(None) => return None,
                Instruction::Return(Some(_)) => return Some(pop(&mut stack)),

                Instruction::GetStatic(field) => {
                    let key = (field.class.as_str().to_owned(), field.name.as_str().to_owned());
                    let value = self
                        .statics
                        .get(&key)
                        .cloned()
                        .unwrap_or_else(|| Value::default_for(&field.descriptor));
                    stack.push(value);
                }
                Instruction::PutStatic(field) => {
                    let key = (field.class.as_str().to_owned(), field.name.as_str().to_owned());
                    let value = pop(&mut stack);
                    self.statics.insert(key, value);
                }
                Instruction::GetField(field) => {
                    let object = pop(&mut stack).object();
                    let value = match &*object.borrow() {
                        Object::Instance { fields, .. } => fields
                            .get(field.name.as_str())
                            .cloned()
                            .unwrap_or_else(|| Value::default_for(&field.descriptor)),
                        other => panic!("expected an instance, found {:?}", other),
                    };
                    stack.push(value);
                }
                Instruction::PutField(field) => {
                    let value = pop(&mut stack);
                    let object = pop(&mut stack).object();
                    match &mut *object.borrow_mut() {
                        Object::Instance { fields, .. } => {
                            fields.insert(field.name.as_str().to_owned(), value);
                        }
                        other => panic!("expected an instance, found {:?}", other),
                    };
                }
                Instruction::New(class) => stack.push(new_object(Object::Instance {
                    class: class.clone(),
                    fields: HashMap::new(),
                })),

                Instruction::Invoke(invoke_type, method) => {
                    let count = method.descriptor.parameters.len();
                    let args = stack.split_off(stack.len() - count);
                    let class = match &method.class {
                        RefType::Object(class) => class.clone(),
                        other => panic!("unexpected method owner {:?}", other),
                    };
                    let result = match invoke_type {
                        InvokeType::Static
                            if self.eager_factories && class.as_str() == "me/alec/Lib" =>
                        {
                            let body = args.last().cloned().unwrap_or(Value::Null);
                            Some(new_object(Object::Constant(body)))
                        }
                        InvokeType::Static => {
                            let unit = self
                                .find_method(&class, &method.name, &method.descriptor)
                                .unwrap_or_else(|| panic!("no method {}.{}", class, method.name));
                            self.run(&unit, args)
                        }
                        InvokeType::Special => {
                            let receiver = pop(&mut stack);
                            match self.find_method(&class, &method.name, &method.descriptor) {
                                Some(unit) => self.run(&unit, prepend(receiver, args)),
                                // `Object.<init>` and friends
                                None => None,
                            }
                        }
                        InvokeType::Virtual | InvokeType::Interface => {
                            let receiver = pop(&mut stack);
                            let object = receiver.object();
                            let dynamic_class = match &*object.borrow() {
                                Object::Constant(value) => Err(value.clone()),
                                Object::Instance { class, .. } => Ok(class.clone()),
                                Object::Array(_) => panic!("no methods on arrays"),
                            };
                            match dynamic_class {
                                Err(constant) => Some(constant),
                                Ok(dynamic_class) => {
                                    let unit = self
                                        .find_method(
                                            &dynamic_class,
                                            &method.name,
                                            &method.descriptor,
                                        )
                                        .unwrap_or_else(|| {
                                            panic!(
                                                "{} does not implement {}",
                                                dynamic_class, method.name
                                            )
                                        });
                                    self.run(&unit, prepend(receiver, args))
                                }
                            }
                        }
                    };
                    if let Some(result) = result {
                        stack.push(result);
                    }
                }

                other => panic!("unsupported instruction {:?}", other),
            }
        }
    }
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("operand stack underflow")
}

fn new_object(object: Object) -> Value {
    Value::Ref(Rc::new(RefCell::new(object)))
}

fn prepend(receiver: Value, args: Vec<Value>) -> Vec<Value> {
    let mut all = vec![receiver];
    all.extend(args);
    all
}

fn binary(stack: &mut Vec<Value>, op: fn(i32, i32) -> i32) {
    let right = pop(stack).int();
    let left = pop(stack).int();
    stack.push(Value::Int(op(left, right)));
}

fn compare(comparison: OrdComparison, left: i32, right: i32) -> bool {
    match comparison {
        OrdComparison::EQ => left == right,
        OrdComparison::NE => left != right,
        OrdComparison::LT => left < right,
        OrdComparison::GE => left >= right,
        OrdComparison::GT => left > right,
        OrdComparison::LE => left <= right,
    }
}
